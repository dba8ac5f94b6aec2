use super::Device;
use crate::address::{Address, Category, DevCat, ProductKey};
use crate::engine::EngineVersion;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// What discovery learned about a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub address: Address,
    pub devcat: DevCat,
    pub product_key: ProductKey,
    pub engine_version: EngineVersion,
}

/// Turns a generic device into a category specific one.
pub type Initializer = Arc<dyn Fn(Box<dyn Device>, DeviceInfo) -> Box<dyn Device> + Send + Sync>;

/// Device category to initializer map, consulted by discovery.
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    initializers: HashMap<Category, Initializer>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, category: Category, initializer: F)
    where
        F: Fn(Box<dyn Device>, DeviceInfo) -> Box<dyn Device> + Send + Sync + 'static,
    {
        self.initializers.insert(category, Arc::new(initializer));
    }

    pub fn delete(&mut self, category: Category) {
        self.initializers.remove(&category);
    }

    pub fn find(&self, category: Category) -> Option<Initializer> {
        self.initializers.get(&category).cloned()
    }

    /// Run the initializer registered for the device's category, if any.
    pub fn initialize(&self, device: Box<dyn Device>, info: DeviceInfo) -> Box<dyn Device> {
        match self.find(info.devcat.category()) {
            Some(initializer) => initializer(device, info),
            None => device,
        }
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.initializers.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_find_delete() {
        let mut registry = DeviceRegistry::new();
        assert!(registry.find(Category(0x01)).is_none());

        registry.register(Category(0x01), |device, _| device);
        assert!(registry.find(Category(0x01)).is_some());
        assert!(registry.find(Category(0x02)).is_none());

        registry.delete(Category(0x01));
        assert!(registry.find(Category(0x01)).is_none());
    }

    #[test]
    fn device_info_json() {
        let info = DeviceInfo {
            address: Address::new(1, 2, 3),
            devcat: DevCat([0x01, 0x20]),
            product_key: ProductKey([0, 0, 0x41]),
            engine_version: EngineVersion::I2Cs,
        };
        let json = serde_json::to_value(info).unwrap();
        assert_eq!(json["address"], "01.02.03");
        assert_eq!(json["devcat"], "01.20");
        assert_eq!(json["engine_version"], "I2CS");
        assert_eq!(json["engine_version"], info.engine_version.to_string());
        let back: DeviceInfo = serde_json::from_value(json).unwrap();
        assert_eq!(back, info);
    }
}

//! Device discovery on top of a modem session.

use crate::address::{Address, ProductData};
use crate::command::CMD_GET_ENGINE_VERSION;
use crate::device::{self, Device, DeviceInfo, DeviceRegistry, I1Device};
use crate::engine::EngineVersion;
use crate::error::InsteonError;
use crate::plm::Plm;
use tracing::{info, warn};

pub struct Network {
    plm: Plm,
    registry: DeviceRegistry,
}

impl Network {
    pub fn new(plm: Plm, registry: DeviceRegistry) -> Self {
        Network { plm, registry }
    }

    pub fn plm(&self) -> &Plm {
        &self.plm
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Ask a device which engine it runs.
    ///
    /// I2CS devices refuse the request from a modem they are not linked to,
    /// which is how they are told apart.
    pub async fn engine_version(&self, address: Address) -> Result<EngineVersion, InsteonError> {
        let conn = self.plm.dial(address, EngineVersion::I1).await?;
        let result = conn.send(CMD_GET_ENGINE_VERSION, &[]).await;
        conn.close().await;
        match result {
            Ok(ack) => EngineVersion::from_ack(ack.command.cmd2()),
            Err(InsteonError::NotLinked) => Ok(EngineVersion::I2Cs),
            Err(err) => Err(err),
        }
    }

    /// Identify the device at `address` and build the matching device.
    pub async fn connect(&self, address: Address) -> Result<(Box<dyn Device>, DeviceInfo), InsteonError> {
        let version = self.engine_version(address).await?;
        let conn = self.plm.dial(address, version).await?;

        let product = match I1Device::new(conn.clone()).product_data().await {
            Ok(product) => product,
            Err(InsteonError::ConnectionClosed) => return Err(InsteonError::ConnectionClosed),
            Err(err) => {
                warn!("{} product data unavailable: {}", address, err);
                ProductData::default()
            }
        };

        let info = DeviceInfo {
            address,
            devcat: product.devcat,
            product_key: product.key,
            engine_version: version,
        };
        info!("{} is an {} device, {}", address, version, product);
        let device = self.registry.initialize(device::for_connection(conn), info);
        Ok((device, info))
    }
}

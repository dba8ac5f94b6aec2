//! Device capabilities and the engine specific device variants.
//!
//! Every device is a [`Device`]. The other capabilities are optional and
//! found with the `as_*` queries instead of downcasting.

mod i1;
mod i2;
mod i2cs;
mod registry;

pub use i1::I1Device;
pub use i2::{ALDB_START, I2Device};
pub use i2cs::I2CsDevice;
pub use registry::{DeviceInfo, DeviceRegistry, Initializer};

use crate::address::Address;
use crate::command::Command;
use crate::connection::ConnectionHandle;
use crate::engine::EngineVersion;
use crate::error::InsteonError;
use crate::link::{Group, LinkRecord};
use crate::message::Message;
use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;

#[async_trait]
pub trait Device: fmt::Display + Send + Sync {
    fn address(&self) -> Address;

    fn engine_version(&self) -> EngineVersion;

    /// Send a command and return the device's Ack.
    async fn send_command(&self, command: Command, payload: &[u8]) -> Result<Message, InsteonError>;

    /// Send a command and return the messages that follow its Ack.
    async fn send_command_and_listen(
        &self,
        command: Command,
        payload: &[u8],
        filter: &[Command],
    ) -> Result<mpsc::Receiver<Message>, InsteonError>;

    async fn close(&self);

    fn as_linkable(&self) -> Option<&dyn LinkableDevice> {
        None
    }

    fn as_all_linkable(&self) -> Option<&dyn AllLinkableDevice> {
        None
    }

    fn as_pingable(&self) -> Option<&dyn PingableDevice> {
        None
    }
}

/// Link database management.
#[async_trait]
pub trait LinkableDevice: Send + Sync {
    async fn enter_linking_mode(&self, group: Group) -> Result<(), InsteonError>;

    async fn enter_unlinking_mode(&self, group: Group) -> Result<(), InsteonError>;

    async fn exit_linking_mode(&self) -> Result<(), InsteonError>;

    /// The records currently in use.
    async fn links(&self) -> Result<Vec<LinkRecord>, InsteonError>;

    async fn add_link(&self, record: LinkRecord) -> Result<(), InsteonError>;

    async fn remove_links(&self, records: &[LinkRecord]) -> Result<(), InsteonError>;

    async fn write_link(&self, record: LinkRecord) -> Result<(), InsteonError>;
}

#[async_trait]
pub trait AllLinkableDevice: Send + Sync {
    async fn assign_to_all_link_group(&self, group: Group) -> Result<(), InsteonError>;

    async fn delete_from_all_link_group(&self, group: Group) -> Result<(), InsteonError>;
}

#[async_trait]
pub trait PingableDevice: Send + Sync {
    async fn ping(&self) -> Result<(), InsteonError>;
}

/// Build the device variant matching the connection's engine version.
pub fn for_connection(conn: ConnectionHandle) -> Box<dyn Device> {
    match conn.engine_version() {
        EngineVersion::I1 => Box::new(I1Device::new(conn)),
        EngineVersion::I2 => Box::new(I2Device::new(conn)),
        EngineVersion::I2Cs => Box::new(I2CsDevice::new(conn)),
    }
}

use super::{AllLinkableDevice, Device, I2Device, LinkableDevice, PingableDevice};
use crate::address::{Address, ProductData};
use crate::command::Command;
use crate::connection::ConnectionHandle;
use crate::engine::EngineVersion;
use crate::error::InsteonError;
use crate::link::{Group, LinkRecord};
use crate::message::Message;
use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;

/// An I2 device that checks message checksums.
///
/// Payload padding and checksums follow the connection's engine version, so
/// the connection should be dialed with [`EngineVersion::I2Cs`].
#[derive(Debug, Clone)]
pub struct I2CsDevice {
    i2: I2Device,
}

impl I2CsDevice {
    pub fn new(conn: ConnectionHandle) -> Self {
        I2CsDevice { i2: I2Device::new(conn) }
    }

    pub fn connection(&self) -> &ConnectionHandle {
        self.i2.connection()
    }

    pub async fn product_data(&self) -> Result<ProductData, InsteonError> {
        self.i2.product_data().await
    }
}

impl fmt::Display for I2CsDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I2CS Device ({})", self.address())
    }
}

#[async_trait]
impl Device for I2CsDevice {
    fn address(&self) -> Address {
        self.i2.address()
    }

    fn engine_version(&self) -> EngineVersion {
        self.i2.engine_version()
    }

    async fn send_command(&self, command: Command, payload: &[u8]) -> Result<Message, InsteonError> {
        self.i2.send_command(command, payload).await
    }

    async fn send_command_and_listen(
        &self,
        command: Command,
        payload: &[u8],
        filter: &[Command],
    ) -> Result<mpsc::Receiver<Message>, InsteonError> {
        self.i2.send_command_and_listen(command, payload, filter).await
    }

    async fn close(&self) {
        self.i2.close().await;
    }

    fn as_linkable(&self) -> Option<&dyn LinkableDevice> {
        Some(self)
    }

    fn as_all_linkable(&self) -> Option<&dyn AllLinkableDevice> {
        self.i2.as_all_linkable()
    }

    fn as_pingable(&self) -> Option<&dyn PingableDevice> {
        self.i2.as_pingable()
    }
}

#[async_trait]
impl LinkableDevice for I2CsDevice {
    async fn enter_linking_mode(&self, group: Group) -> Result<(), InsteonError> {
        let (command, payload) = self.engine_version().linking_command(group);
        self.send_command(command, &payload).await.map(|_| ())
    }

    async fn enter_unlinking_mode(&self, group: Group) -> Result<(), InsteonError> {
        self.i2.enter_unlinking_mode(group).await
    }

    async fn exit_linking_mode(&self) -> Result<(), InsteonError> {
        self.i2.exit_linking_mode().await
    }

    async fn links(&self) -> Result<Vec<LinkRecord>, InsteonError> {
        self.i2.links().await
    }

    async fn add_link(&self, record: LinkRecord) -> Result<(), InsteonError> {
        self.i2.add_link(record).await
    }

    async fn remove_links(&self, records: &[LinkRecord]) -> Result<(), InsteonError> {
        self.i2.remove_links(records).await
    }

    async fn write_link(&self, record: LinkRecord) -> Result<(), InsteonError> {
        self.i2.write_link(record).await
    }
}

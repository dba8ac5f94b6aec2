use super::{AllLinkableDevice, Device, PingableDevice};
use crate::address::{Address, ProductData};
use crate::command::{
    CMD_ASSIGN_TO_ALL_LINK_GROUP, CMD_DELETE_FROM_ALL_LINK_GROUP, CMD_PING, CMD_PRODUCT_DATA_REQ,
    CMD_PRODUCT_DATA_RESP, Command,
};
use crate::connection::ConnectionHandle;
use crate::engine::EngineVersion;
use crate::error::InsteonError;
use crate::link::Group;
use crate::message::Message;
use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::debug;

/// A first generation device. Commands go out exactly as given.
#[derive(Debug, Clone)]
pub struct I1Device {
    conn: ConnectionHandle,
}

impl I1Device {
    pub fn new(conn: ConnectionHandle) -> Self {
        I1Device { conn }
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.conn
    }

    /// Wait for the next message on `rx`, bounded by the connection timeout.
    pub(crate) async fn next_message(&self, rx: &mut mpsc::Receiver<Message>) -> Result<Message, InsteonError> {
        match timeout(self.conn.timeout(), rx.recv()).await {
            Ok(Some(msg)) => Ok(msg),
            Ok(None) => Err(InsteonError::ConnectionClosed),
            Err(_) => Err(InsteonError::ReadTimeout),
        }
    }

    pub async fn product_data(&self) -> Result<ProductData, InsteonError> {
        let mut rx = self
            .conn
            .send_and_listen(CMD_PRODUCT_DATA_REQ, &[], &[CMD_PRODUCT_DATA_RESP])
            .await?;
        let msg = self.next_message(&mut rx).await?;
        let pd = ProductData::try_from(msg.payload.as_slice())?;
        debug!("{} product data {}", self.conn.address(), pd);
        Ok(pd)
    }
}

impl fmt::Display for I1Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I1 Device ({})", self.conn.address())
    }
}

#[async_trait]
impl Device for I1Device {
    fn address(&self) -> Address {
        self.conn.address()
    }

    fn engine_version(&self) -> EngineVersion {
        self.conn.engine_version()
    }

    async fn send_command(&self, command: Command, payload: &[u8]) -> Result<Message, InsteonError> {
        self.conn.send(command, payload).await
    }

    async fn send_command_and_listen(
        &self,
        command: Command,
        payload: &[u8],
        filter: &[Command],
    ) -> Result<mpsc::Receiver<Message>, InsteonError> {
        self.conn.send_and_listen(command, payload, filter).await
    }

    async fn close(&self) {
        self.conn.close().await;
    }

    fn as_all_linkable(&self) -> Option<&dyn AllLinkableDevice> {
        Some(self)
    }

    fn as_pingable(&self) -> Option<&dyn PingableDevice> {
        Some(self)
    }
}

#[async_trait]
impl AllLinkableDevice for I1Device {
    async fn assign_to_all_link_group(&self, group: Group) -> Result<(), InsteonError> {
        self.conn
            .send(CMD_ASSIGN_TO_ALL_LINK_GROUP.sub_command(group.0), &[])
            .await
            .map(|_| ())
    }

    async fn delete_from_all_link_group(&self, group: Group) -> Result<(), InsteonError> {
        self.conn
            .send(CMD_DELETE_FROM_ALL_LINK_GROUP.sub_command(group.0), &[])
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl PingableDevice for I1Device {
    async fn ping(&self) -> Result<(), InsteonError> {
        self.conn.send(CMD_PING, &[]).await.map(|_| ())
    }
}

use super::{AllLinkableDevice, Device, I1Device, LinkableDevice, PingableDevice};
use crate::address::{Address, ProductData};
use crate::command::{CMD_ENTER_UNLINKING_MODE, CMD_EXIT_LINKING_MODE, CMD_READ_WRITE_ALDB, Command};
use crate::connection::ConnectionHandle;
use crate::engine::EngineVersion;
use crate::error::InsteonError;
use crate::link::{Group, LinkRecord};
use crate::message::{EXTENDED_PAYLOAD_LEN, Message};
use async_trait::async_trait;
use byteorder::{BigEndian, ByteOrder};
use std::fmt;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// First (highest) slot of a device link database. Records grow downwards.
pub const ALDB_START: u16 = 0x0fff;

const ALDB_READ: u8 = 0x00;
const ALDB_RECORD: u8 = 0x01;
const ALDB_WRITE: u8 = 0x02;

/// A device with a link database reachable through the read/write ALDB
/// extended command.
#[derive(Debug, Clone)]
pub struct I2Device {
    i1: I1Device,
}

struct DatabaseDump {
    records: Vec<LinkRecord>,
    end: Option<u16>,
}

impl I2Device {
    pub fn new(conn: ConnectionHandle) -> Self {
        I2Device { i1: I1Device::new(conn) }
    }

    pub fn connection(&self) -> &ConnectionHandle {
        self.i1.connection()
    }

    pub async fn product_data(&self) -> Result<ProductData, InsteonError> {
        self.i1.product_data().await
    }

    async fn read_database(&self) -> Result<DatabaseDump, InsteonError> {
        let mut payload = [0u8; EXTENDED_PAYLOAD_LEN];
        payload[1] = ALDB_READ;
        let mut rx = self
            .connection()
            .send_and_listen(CMD_READ_WRITE_ALDB, &payload, &[CMD_READ_WRITE_ALDB])
            .await?;

        let mut records: Vec<LinkRecord> = Vec::new();
        loop {
            let msg = self.i1.next_message(&mut rx).await?;
            if msg.payload.len() < EXTENDED_PAYLOAD_LEN || msg.payload[1] != ALDB_RECORD {
                continue;
            }
            let mut record = LinkRecord::from_bytes(&msg.payload[5..13])?;
            record.mem_address = BigEndian::read_u16(&msg.payload[2..4]);

            if record.is_end_of_database() {
                debug!("{} end of database at {:04x}", self.address(), record.mem_address);
                return Ok(DatabaseDump {
                    records,
                    end: Some(record.mem_address),
                });
            }
            if records.iter().any(|r| r.mem_address == record.mem_address) {
                continue;
            }
            records.push(record);
        }
    }

    async fn write_record(&self, mem_address: u16, record: &LinkRecord) -> Result<(), InsteonError> {
        let mut payload = [0u8; EXTENDED_PAYLOAD_LEN];
        payload[1] = ALDB_WRITE;
        BigEndian::write_u16(&mut payload[2..4], mem_address);
        payload[4] = LinkRecord::LEN as u8;
        payload[5..13].copy_from_slice(&record.to_bytes());
        debug!("{} writing {} at {:04x}", self.address(), record, mem_address);
        self.connection().send(CMD_READ_WRITE_ALDB, &payload).await.map(|_| ())
    }
}

impl fmt::Display for I2Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I2 Device ({})", self.address())
    }
}

#[async_trait]
impl Device for I2Device {
    fn address(&self) -> Address {
        self.i1.address()
    }

    fn engine_version(&self) -> EngineVersion {
        self.i1.engine_version()
    }

    async fn send_command(&self, command: Command, payload: &[u8]) -> Result<Message, InsteonError> {
        self.i1.send_command(command, payload).await
    }

    async fn send_command_and_listen(
        &self,
        command: Command,
        payload: &[u8],
        filter: &[Command],
    ) -> Result<mpsc::Receiver<Message>, InsteonError> {
        self.i1.send_command_and_listen(command, payload, filter).await
    }

    async fn close(&self) {
        self.i1.close().await;
    }

    fn as_linkable(&self) -> Option<&dyn LinkableDevice> {
        Some(self)
    }

    fn as_all_linkable(&self) -> Option<&dyn AllLinkableDevice> {
        self.i1.as_all_linkable()
    }

    fn as_pingable(&self) -> Option<&dyn PingableDevice> {
        self.i1.as_pingable()
    }
}

#[async_trait]
impl LinkableDevice for I2Device {
    async fn enter_linking_mode(&self, group: Group) -> Result<(), InsteonError> {
        let (command, payload) = self.engine_version().linking_command(group);
        self.send_command(command, &payload).await.map(|_| ())
    }

    async fn enter_unlinking_mode(&self, group: Group) -> Result<(), InsteonError> {
        self.send_command(CMD_ENTER_UNLINKING_MODE.sub_command(group.0), &[])
            .await
            .map(|_| ())
    }

    async fn exit_linking_mode(&self) -> Result<(), InsteonError> {
        self.send_command(CMD_EXIT_LINKING_MODE, &[]).await.map(|_| ())
    }

    async fn links(&self) -> Result<Vec<LinkRecord>, InsteonError> {
        let dump = self.read_database().await?;
        Ok(dump.records.into_iter().filter(|r| r.flags.in_use()).collect())
    }

    async fn add_link(&self, record: LinkRecord) -> Result<(), InsteonError> {
        let dump = self.read_database().await?;
        let slot = dump
            .records
            .iter()
            .find(|r| r.flags.available())
            .map(|r| r.mem_address)
            .or(dump.end)
            .unwrap_or(ALDB_START);
        info!("{} adding {} at {:04x}", self.address(), record, slot);
        self.write_record(slot, &record).await
    }

    async fn remove_links(&self, records: &[LinkRecord]) -> Result<(), InsteonError> {
        let dump = self.read_database().await?;
        for stored in dump.records.iter().filter(|r| r.flags.in_use()) {
            if records.contains(stored) {
                let mut cleared = *stored;
                cleared.flags.set_available();
                info!("{} removing {}", self.address(), stored);
                self.write_record(stored.mem_address, &cleared).await?;
            }
        }
        Ok(())
    }

    async fn write_link(&self, record: LinkRecord) -> Result<(), InsteonError> {
        if record.mem_address == 0 {
            return self.add_link(record).await;
        }
        self.write_record(record.mem_address, &record).await
    }
}

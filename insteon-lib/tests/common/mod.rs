//! Common test utilities: fixtures and an in-memory modem.
//!
//! The modem answers the host commands the library sends, keeps its own link
//! database and forwards 0x62 messages to simulated devices.

// shared by several test files, not every item is used by each
#![allow(dead_code, unused_imports)]

pub use bytes::{Buf, Bytes, BytesMut};
pub use insteon_lib::address::{Address, DevCat, ProductKey};
pub use insteon_lib::engine::EngineVersion;
pub use insteon_lib::error::InsteonError;
pub use insteon_lib::link::{Group, LinkRecord, RecordControlFlags};
pub use insteon_lib::message::{Flags, Message, checksum};
pub use insteon_lib::plm::{Plm, PlmConfig};

use byteorder::{BigEndian, ByteOrder};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

pub const MODEM_ADDRESS: Address = Address::new(0x44, 0x85, 0x11);

/// Decode hex string to bytes for testing
pub fn hex_to_bytes(hex_data: &str) -> Bytes {
    Bytes::from(hex::decode(hex_data).expect("Failed to decode hex"))
}

pub fn record(flags: RecordControlFlags, group: u8, address: Address) -> LinkRecord {
    LinkRecord::new(flags, Group(group), address, [0, 0, 0])
}

pub fn test_config() -> PlmConfig {
    PlmConfig {
        ack_timeout: Duration::from_millis(500),
        write_timeout: Duration::from_millis(500),
        read_timeout: Duration::from_millis(500),
        queue_depth: 16,
    }
}

#[derive(Debug, Clone)]
pub struct FakeDevice {
    pub version: EngineVersion,
    pub linked: bool,
    pub devcat: DevCat,
    pub key: ProductKey,
    /// Slot `i` lives at memory address `0x0fff - 8 * i`.
    pub aldb: Vec<LinkRecord>,
}

impl FakeDevice {
    pub fn new(version: EngineVersion) -> Self {
        FakeDevice {
            version,
            linked: true,
            devcat: DevCat([0x01, 0x20]),
            key: ProductKey([0x00, 0x00, 0x41]),
            aldb: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ModemState {
    pub links: Vec<LinkRecord>,
    pub cursor: usize,
    /// NAK this many StartAllLink requests before accepting one.
    pub start_link_naks: usize,
    /// Ignore this many GetInfo requests before answering one.
    pub info_silences: usize,
    /// NAK every delete once this many have succeeded.
    pub deletes_allowed: Option<usize>,
    pub devices: HashMap<Address, FakeDevice>,
    /// Every message the host asked the modem to send.
    pub sent: Vec<Message>,
}

pub type SharedModem = Arc<Mutex<ModemState>>;

/// Start a modem with `state` and a library session talking to it.
pub fn start_modem(state: ModemState) -> (Plm, SharedModem) {
    let (host, modem) = tokio::io::duplex(4096);
    let state = Arc::new(Mutex::new(state));
    tokio::spawn(run_modem(modem, state.clone()));
    (Plm::new(host, test_config()), state)
}

/// Payload length of a host request, after the command byte.
fn request_len(command: u8, payload: &[u8]) -> Option<usize> {
    match command {
        0x60 | 0x65 | 0x69 | 0x6a => Some(0),
        0x64 => Some(2),
        0x6f => Some(9),
        0x62 => payload.get(3).map(|flags| if flags & 0x10 != 0 { 20 } else { 6 }),
        _ => panic!("modem got unexpected command 0x{command:02x}"),
    }
}

async fn run_modem(mut port: DuplexStream, state: SharedModem) {
    let mut buf = BytesMut::new();
    loop {
        match port.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        while buf.len() >= 2 {
            assert_eq!(buf[0], 0x02, "host frames start with 0x02");
            let command = buf[1];
            let Some(len) = request_len(command, &buf[2..]) else {
                break;
            };
            if buf.len() < 2 + len {
                break;
            }
            let frame = buf.split_to(2 + len);
            let reply = state.lock().unwrap().respond(command, &frame[2..]);
            if port.write_all(&reply).await.is_err() {
                return;
            }
        }
    }
}

fn echo(out: &mut Vec<u8>, command: u8, payload: &[u8], ack: bool) {
    out.extend_from_slice(&[0x02, command]);
    out.extend_from_slice(payload);
    out.push(if ack { 0x06 } else { 0x15 });
}

fn record_response(out: &mut Vec<u8>, record: &LinkRecord) {
    out.extend_from_slice(&[0x02, 0x57]);
    out.extend_from_slice(&record.to_bytes());
}

fn device_message(out: &mut Vec<u8>, src: Address, flags: u8, cmd1: u8, cmd2: u8, payload: Option<[u8; 14]>) {
    out.push(0x02);
    out.push(if payload.is_some() { 0x51 } else { 0x50 });
    out.extend_from_slice(&src.0);
    out.extend_from_slice(&MODEM_ADDRESS.0);
    out.extend_from_slice(&[flags, cmd1, cmd2]);
    if let Some(payload) = payload {
        out.extend_from_slice(&payload);
    }
}

impl ModemState {
    fn respond(&mut self, command: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        match command {
            0x60 if self.info_silences > 0 => self.info_silences -= 1,
            0x60 => {
                let mut info = MODEM_ADDRESS.0.to_vec();
                info.extend_from_slice(&[0x03, 0x15, 0x9e]);
                echo(&mut out, command, &info, true);
            }
            0x64 => {
                let ack = self.start_link_naks == 0;
                self.start_link_naks = self.start_link_naks.saturating_sub(1);
                echo(&mut out, command, payload, ack);
            }
            0x65 => echo(&mut out, command, payload, true),
            0x69 => {
                self.cursor = 0;
                match self.links.first() {
                    Some(first) => {
                        echo(&mut out, command, payload, true);
                        record_response(&mut out, first);
                    }
                    None => echo(&mut out, command, payload, false),
                }
            }
            0x6a => {
                self.cursor += 1;
                match self.links.get(self.cursor) {
                    Some(next) => {
                        echo(&mut out, command, payload, true);
                        record_response(&mut out, next);
                    }
                    None => echo(&mut out, command, payload, false),
                }
            }
            0x6f => {
                let ok = self.manage_record(payload);
                echo(&mut out, command, payload, ok);
            }
            0x62 => {
                echo(&mut out, command, payload, true);
                let mut wire = MODEM_ADDRESS.0.to_vec();
                wire.extend_from_slice(payload);
                let msg = Message::decode(&wire).expect("valid message");
                self.sent.push(msg.clone());
                self.deliver(&mut out, &msg);
            }
            _ => unreachable!(),
        }
        out
    }

    fn manage_record(&mut self, payload: &[u8]) -> bool {
        let record = LinkRecord::from_bytes(&payload[1..]).expect("record");
        match payload[0] {
            0x40 | 0x41 => {
                let mut stored = record;
                stored.flags.set_in_use();
                if payload[0] == 0x40 {
                    stored.flags.set_controller();
                } else {
                    stored.flags.set_responder();
                }
                self.links.push(stored);
                true
            }
            0x80 => {
                if let Some(allowed) = self.deletes_allowed.as_mut() {
                    if *allowed == 0 {
                        return false;
                    }
                    *allowed -= 1;
                }
                match self.links.iter().position(|l| l.same_target(&record)) {
                    Some(pos) => {
                        self.links.remove(pos);
                        true
                    }
                    None => false,
                }
            }
            other => panic!("unexpected record command 0x{other:02x}"),
        }
    }

    fn deliver(&mut self, out: &mut Vec<u8>, msg: &Message) {
        let Some(device) = self.devices.get_mut(&msg.dst) else {
            return;
        };
        let src = msg.dst;
        let (cmd1, cmd2) = (msg.command.cmd1(), msg.command.cmd2());
        let nak = |out: &mut Vec<u8>, code: u8| device_message(out, src, 0xaf, cmd1, code, None);
        let ack = |out: &mut Vec<u8>, value: u8| device_message(out, src, 0x2f, cmd1, value, None);

        if device.version == EngineVersion::I2Cs && msg.flags.is_extended() {
            let mut sum = vec![cmd1, cmd2];
            sum.extend_from_slice(&msg.payload[..13]);
            if checksum(&sum) != msg.payload[13] {
                return nak(out, 0xfd);
            }
        }

        match cmd1 {
            0x0d => {
                if device.version == EngineVersion::I2Cs && !device.linked {
                    nak(out, 0xff);
                } else {
                    ack(out, u8::from(device.version));
                }
            }
            0x03 => {
                ack(out, cmd2);
                let mut data = [0u8; 14];
                data[1..4].copy_from_slice(&device.key.0);
                data[4..6].copy_from_slice(&device.devcat.0);
                data[6] = 0xff;
                device_message(out, src, 0x1f, 0x03, 0x00, Some(data));
            }
            0x2f if msg.payload[1] == 0x00 => {
                ack(out, cmd2);
                let end = LinkRecord::default();
                for (i, link) in device.aldb.iter().chain(std::iter::once(&end)).enumerate() {
                    let mut data = [0u8; 14];
                    data[1] = 0x01;
                    BigEndian::write_u16(&mut data[2..4], 0x0fff - 8 * i as u16);
                    data[5..13].copy_from_slice(&link.to_bytes());
                    device_message(out, src, 0x1f, 0x2f, 0x00, Some(data));
                }
            }
            0x2f if msg.payload[1] == 0x02 => {
                let mem = BigEndian::read_u16(&msg.payload[2..4]);
                let slot = usize::from((0x0fff - mem) / 8);
                let mut link = LinkRecord::from_bytes(&msg.payload[5..13]).expect("record");
                link.mem_address = mem;
                if slot < device.aldb.len() {
                    device.aldb[slot] = link;
                } else {
                    device.aldb.push(link);
                }
                ack(out, cmd2);
            }
            _ => ack(out, cmd2),
        }
    }
}

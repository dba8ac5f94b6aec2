//! The Insteon message: addressing, the flags byte, the command word and the
//! optional extended payload, plus the byte-exact codec for it.

use crate::address::Address;
use crate::command::Command;
use crate::engine::EngineVersion;
use crate::error::InsteonError;
use bytes::{BufMut, Bytes, BytesMut};
use modular_bitfield::prelude::*;
use num_enum::{FromPrimitive, IntoPrimitive};
use std::fmt;
use strum_macros::Display;

/// Length of a standard message on the wire.
pub const STANDARD_MSG_LEN: usize = 9;
/// User data plus checksum carried by an extended message.
pub const EXTENDED_PAYLOAD_LEN: usize = 14;
/// Length of an extended message on the wire.
pub const EXTENDED_MSG_LEN: usize = STANDARD_MSG_LEN + EXTENDED_PAYLOAD_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum MessageType {
    #[num_enum(default)]
    #[strum(to_string = "D")]
    Direct = 0,
    #[strum(to_string = "D Ack")]
    DirectAck = 1,
    #[strum(to_string = "C")]
    AllLinkCleanup = 2,
    #[strum(to_string = "C Ack")]
    AllLinkCleanupAck = 3,
    #[strum(to_string = "B")]
    Broadcast = 4,
    #[strum(to_string = "D NAK")]
    DirectNak = 5,
    #[strum(to_string = "A")]
    AllLinkBroadcast = 6,
    #[strum(to_string = "C NAK")]
    AllLinkCleanupNak = 7,
}

impl MessageType {
    pub fn is_direct(&self) -> bool {
        !self.is_broadcast()
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self, MessageType::Broadcast | MessageType::AllLinkBroadcast)
    }
}

#[bitfield(bytes = 1)]
#[derive(Debug, Clone, Copy)]
struct FlagBits {
    ttl: B2,
    max_ttl: B2,
    extended: bool,
    message_type: B3,
}

/// The message flags byte.
///
/// Bits 7-5 message type, bit 4 extended, bits 3-2 max TTL, bits 1-0 TTL.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Flags(pub u8);

impl Flags {
    pub const STANDARD_DIRECT: Flags = Flags(0x0f);
    pub const EXTENDED_DIRECT: Flags = Flags(0x1f);
    pub const STANDARD_DIRECT_ACK: Flags = Flags(0x2f);
    pub const STANDARD_DIRECT_NAK: Flags = Flags(0xaf);
    pub const STANDARD_BROADCAST: Flags = Flags(0x8f);
    pub const STANDARD_ALL_LINK_BROADCAST: Flags = Flags(0xcf);

    pub fn new(message_type: MessageType, extended: bool, ttl: u8, max_ttl: u8) -> Self {
        let bits = FlagBits::new()
            .with_ttl(ttl & 0x03)
            .with_max_ttl(max_ttl & 0x03)
            .with_extended(extended)
            .with_message_type(u8::from(message_type));
        Flags(bits.into_bytes()[0])
    }

    fn bits(self) -> FlagBits {
        FlagBits::from_bytes([self.0])
    }

    pub fn message_type(self) -> MessageType {
        MessageType::from_primitive(self.bits().message_type())
    }

    pub fn is_extended(self) -> bool {
        self.bits().extended()
    }

    pub fn is_standard(self) -> bool {
        !self.is_extended()
    }

    pub fn ttl(self) -> u8 {
        self.bits().ttl()
    }

    pub fn max_ttl(self) -> u8 {
        self.bits().max_ttl()
    }
}

impl From<u8> for Flags {
    fn from(value: u8) -> Self {
        Flags(value)
    }
}

impl From<Flags> for u8 {
    fn from(flags: Flags) -> Self {
        flags.0
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let size = if self.is_extended() { "E" } else { "S" };
        write!(
            f,
            "{}{:<5} {}:{}",
            size,
            self.message_type().to_string(),
            self.ttl(),
            self.max_ttl()
        )
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Flags(0x{:02x} {})", self.0, self)
    }
}

/// Two's complement checksum of an extended message.
///
/// `buf` is cmd1, cmd2 and the first 13 payload bytes.
pub fn checksum(buf: &[u8]) -> u8 {
    buf.iter().fold(0u8, |sum, b| sum.wrapping_add(*b)).wrapping_neg()
}

#[derive(Debug, Clone, Default)]
pub struct Message {
    pub src: Address,
    pub dst: Address,
    pub flags: Flags,
    pub command: Command,
    /// Empty for standard messages, 14 bytes (13 data + checksum) otherwise.
    pub payload: Vec<u8>,
}

impl Message {
    /// Build a direct message to `dst`; a non-empty payload makes it extended.
    pub fn direct(dst: Address, command: Command, payload: Vec<u8>) -> Self {
        let (flags, payload) = if payload.is_empty() {
            (Flags::STANDARD_DIRECT, payload)
        } else {
            let mut payload = payload;
            payload.resize(EXTENDED_PAYLOAD_LEN, 0);
            (Flags::EXTENDED_DIRECT, payload)
        };
        Message {
            src: Address::default(),
            dst,
            flags,
            command,
            payload,
        }
    }

    /// Decode a message from wire bytes (source address first).
    pub fn decode(buf: &[u8]) -> Result<Self, InsteonError> {
        if buf.len() < STANDARD_MSG_LEN {
            return Err(InsteonError::BufferTooShort {
                expected: STANDARD_MSG_LEN,
                actual: buf.len(),
            });
        }

        let flags = Flags(buf[6]);
        if flags.is_extended() && buf.len() < EXTENDED_MSG_LEN {
            return Err(InsteonError::BufferTooShort {
                expected: EXTENDED_MSG_LEN,
                actual: buf.len(),
            });
        }

        let payload = if flags.is_extended() {
            buf[STANDARD_MSG_LEN..EXTENDED_MSG_LEN].to_vec()
        } else {
            Vec::new()
        };

        Ok(Message {
            src: Address([buf[0], buf[1], buf[2]]),
            dst: Address([buf[3], buf[4], buf[5]]),
            flags,
            command: Command::from_bytes([u8::from(flags.is_extended()), buf[7], buf[8]]),
            payload,
        })
    }

    /// Encode the message exactly as it is, checksum byte included.
    pub fn encode(&self) -> Bytes {
        let extended = self.flags.is_extended();
        let len = if extended { EXTENDED_MSG_LEN } else { STANDARD_MSG_LEN };
        let mut buf = BytesMut::with_capacity(len);
        buf.put_slice(&self.src.0);
        buf.put_slice(&self.dst.0);
        buf.put_u8(self.flags.0);
        buf.put_u8(self.command.cmd1());
        buf.put_u8(self.command.cmd2());
        if extended {
            let n = self.payload.len().min(EXTENDED_PAYLOAD_LEN);
            buf.put_slice(&self.payload[..n]);
            buf.put_bytes(0, EXTENDED_PAYLOAD_LEN - n);
        }
        buf.freeze()
    }

    /// Encode for a device running `version`, fixing the checksum when the
    /// engine checks it.
    pub fn encode_for(&self, version: EngineVersion) -> Bytes {
        if version.requires_checksum() && self.flags.is_extended() {
            let mut msg = self.clone();
            msg.set_checksum();
            msg.encode()
        } else {
            self.encode()
        }
    }

    /// Overwrite the last payload byte with the checksum of the message.
    pub fn set_checksum(&mut self) {
        self.payload.resize(EXTENDED_PAYLOAD_LEN, 0);
        let mut buf = [0u8; EXTENDED_PAYLOAD_LEN + 1];
        buf[0] = self.command.cmd1();
        buf[1] = self.command.cmd2();
        buf[2..].copy_from_slice(&self.payload[..EXTENDED_PAYLOAD_LEN - 1]);
        self.payload[EXTENDED_PAYLOAD_LEN - 1] = checksum(&buf);
    }

    pub fn is_ack(&self) -> bool {
        matches!(
            self.flags.message_type(),
            MessageType::DirectAck | MessageType::AllLinkCleanupAck
        )
    }

    pub fn is_nak(&self) -> bool {
        matches!(
            self.flags.message_type(),
            MessageType::DirectNak | MessageType::AllLinkCleanupNak
        )
    }

    pub fn is_broadcast(&self) -> bool {
        self.flags.message_type().is_broadcast()
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.src == other.src
            && self.dst == other.dst
            && self.flags == other.flags
            && self.command.bytes() == other.command.bytes()
            && self.payload == other.payload
    }
}

impl Eq for Message {}

impl TryFrom<&[u8]> for Message {
    type Error = InsteonError;

    fn try_from(buf: &[u8]) -> Result<Self, Self::Error> {
        Message::decode(buf)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} -> {} {}", self.flags, self.src, self.dst, self.command)?;
        if !self.payload.is_empty() {
            write!(f, " {}", hex::encode(&self.payload))?;
        }
        Ok(())
    }
}

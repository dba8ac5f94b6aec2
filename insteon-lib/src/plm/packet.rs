//! Modem serial frames: `0x02 <command> <payload>`.
//!
//! Frames sent by the host carry only the request payload. The modem echoes
//! every host command back with a trailing ACK (0x06) or NAK (0x15) byte and
//! reports bus traffic with its own unsolicited commands (0x50 to 0x58).

use crate::error::InsteonError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{FromPrimitive, IntoPrimitive};
use std::fmt;
use strum_macros::Display;

pub const START: u8 = 0x02;
pub const ACK: u8 = 0x06;
pub const NAK: u8 = 0x15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum PlmCommand {
    StandardMessageReceived = 0x50,
    ExtendedMessageReceived = 0x51,
    X10MessageReceived = 0x52,
    AllLinkComplete = 0x53,
    ButtonEventReport = 0x54,
    UserResetDetected = 0x55,
    AllLinkCleanupFailureReport = 0x56,
    AllLinkRecordResp = 0x57,
    AllLinkCleanupStatusReport = 0x58,

    GetInfo = 0x60,
    SendAllLink = 0x61,
    SendInsteonMsg = 0x62,
    SendX10 = 0x63,
    StartAllLink = 0x64,
    CancelAllLink = 0x65,
    SetDeviceCategory = 0x66,
    Reset = 0x67,
    SetAckMessageByte = 0x68,
    GetFirstAllLink = 0x69,
    GetNextAllLink = 0x6a,
    SetConfig = 0x6b,
    GetAllLinkForSender = 0x6c,
    LedOn = 0x6d,
    LedOff = 0x6e,
    ManageAllLinkRecord = 0x6f,
    SetNakMessageByte = 0x70,
    SetAckMessageTwoBytes = 0x71,
    RfSleep = 0x72,
    GetConfig = 0x73,

    #[num_enum(catch_all)]
    Unknown(u8),
}

impl PlmCommand {
    /// Commands the host sends; the modem echoes them with ACK or NAK.
    pub fn is_host_command(&self) -> bool {
        u8::from(*self) >= 0x60
    }

    /// Length of an inbound frame's payload, ACK/NAK byte included.
    ///
    /// `payload` is what has been received after the command byte so far.
    /// `Ok(None)` means more bytes are needed to tell.
    pub fn inbound_len(&self, payload: &[u8]) -> Result<Option<usize>, InsteonError> {
        let len = match self {
            PlmCommand::StandardMessageReceived => 9,
            PlmCommand::ExtendedMessageReceived => 23,
            PlmCommand::X10MessageReceived => 2,
            PlmCommand::AllLinkComplete => 8,
            PlmCommand::ButtonEventReport => 1,
            PlmCommand::UserResetDetected => 0,
            PlmCommand::AllLinkCleanupFailureReport => 5,
            PlmCommand::AllLinkRecordResp => 8,
            PlmCommand::AllLinkCleanupStatusReport => 1,
            PlmCommand::GetInfo => 7,
            PlmCommand::SendAllLink => 4,
            PlmCommand::SendInsteonMsg => match payload.get(3) {
                Some(flags) if flags & 0x10 != 0 => 21,
                Some(_) => 7,
                None => return Ok(None),
            },
            PlmCommand::SendX10 => 3,
            PlmCommand::StartAllLink => 3,
            PlmCommand::CancelAllLink => 1,
            PlmCommand::SetDeviceCategory => 4,
            PlmCommand::Reset => 1,
            PlmCommand::SetAckMessageByte => 2,
            PlmCommand::GetFirstAllLink => 1,
            PlmCommand::GetNextAllLink => 1,
            PlmCommand::SetConfig => 2,
            PlmCommand::GetAllLinkForSender => 1,
            PlmCommand::LedOn => 1,
            PlmCommand::LedOff => 1,
            PlmCommand::ManageAllLinkRecord => 10,
            PlmCommand::SetNakMessageByte => 2,
            PlmCommand::SetAckMessageTwoBytes => 3,
            PlmCommand::RfSleep => 1,
            PlmCommand::GetConfig => 4,
            PlmCommand::Unknown(byte) => return Err(InsteonError::UnknownPlmCommand(*byte)),
        };
        Ok(Some(len))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub command: PlmCommand,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(command: PlmCommand, payload: impl Into<Bytes>) -> Self {
        Packet {
            command,
            payload: payload.into(),
        }
    }

    pub fn command(command: PlmCommand) -> Self {
        Packet::new(command, Bytes::new())
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(2 + self.payload.len());
        buf.put_u8(START);
        buf.put_u8(self.command.into());
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    fn ack_byte(&self) -> Option<u8> {
        if self.command.is_host_command() {
            self.payload.last().copied()
        } else {
            None
        }
    }

    pub fn is_ack(&self) -> bool {
        self.ack_byte() == Some(ACK)
    }

    pub fn is_nak(&self) -> bool {
        self.ack_byte() == Some(NAK)
    }

    /// Payload without the trailing ACK/NAK byte of an echo.
    pub fn data(&self) -> &[u8] {
        match self.ack_byte() {
            Some(_) => &self.payload[..self.payload.len() - 1],
            None => &self.payload,
        }
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.command, hex::encode(self.data()))?;
        if self.is_ack() {
            write!(f, " ACK")?;
        } else if self.is_nak() {
            write!(f, " NAK")?;
        }
        Ok(())
    }
}

/// Take the next complete frame off the front of `buf`.
///
/// Bytes before a start byte and frames with unknown commands are skipped.
/// Returns `None` when `buf` holds no complete frame yet.
pub fn next_packet(buf: &mut BytesMut) -> Option<Packet> {
    loop {
        let start = match buf.iter().position(|b| *b == START) {
            Some(start) => start,
            None => {
                buf.clear();
                return None;
            }
        };
        buf.advance(start);

        if buf.len() < 2 {
            return None;
        }
        let command = PlmCommand::from_primitive(buf[1]);
        match command.inbound_len(&buf[2..]) {
            Ok(Some(len)) if buf.len() >= 2 + len => {
                let mut frame = buf.split_to(2 + len);
                frame.advance(2);
                return Some(Packet::new(command, frame.freeze()));
            }
            Ok(_) => return None,
            Err(_) => buf.advance(1),
        }
    }
}

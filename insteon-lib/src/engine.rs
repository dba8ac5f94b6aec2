//! Insteon engine versions and the wire rules that differ between them.
//!
//! A connection is built for one [`EngineVersion`] and every version
//! dependent decision (checksums, payload padding, the linking command, NAK
//! meanings) is made here rather than at the call sites.

use crate::command::{CMD_ENTER_LINKING_MODE, CMD_ENTER_LINKING_MODE_EXT, CMD_SET_OPERATING_FLAGS, Command};
use crate::error::InsteonError;
use crate::link::Group;
use crate::message::EXTENDED_PAYLOAD_LEN;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use strum_macros::Display;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum EngineVersion {
    #[default]
    #[strum(to_string = "I1")]
    I1 = 0,
    #[strum(to_string = "I2")]
    I2 = 1,
    #[strum(to_string = "I2CS")]
    #[serde(rename = "I2CS")]
    I2Cs = 2,
}

impl EngineVersion {
    /// Decode the cmd2 byte of a "get engine version" ack.
    pub fn from_ack(cmd2: u8) -> Result<Self, InsteonError> {
        EngineVersion::try_from(cmd2).map_err(|_| InsteonError::UnknownEngineVersion(cmd2))
    }

    /// Whether extended messages must carry a valid checksum.
    pub fn requires_checksum(self) -> bool {
        !matches!(self, EngineVersion::I1)
    }

    /// Adjust an outgoing command and payload to what this engine expects.
    pub fn prepare(self, command: Command, payload: &[u8]) -> (Command, Vec<u8>) {
        match self {
            EngineVersion::I2Cs if command.cmd1() == CMD_SET_OPERATING_FLAGS.cmd1() && payload.is_empty() => {
                (command, vec![0; EXTENDED_PAYLOAD_LEN])
            }
            _ => (command, payload.to_vec()),
        }
    }

    /// The command (and payload) that puts a device into linking mode.
    pub fn linking_command(self, group: Group) -> (Command, Vec<u8>) {
        match self {
            EngineVersion::I2Cs => (
                CMD_ENTER_LINKING_MODE_EXT.sub_command(group.0),
                vec![0; EXTENDED_PAYLOAD_LEN],
            ),
            _ => (CMD_ENTER_LINKING_MODE.sub_command(group.0), Vec::new()),
        }
    }

    /// Translate the cmd2 byte of a direct NAK into an error.
    pub fn classify_nak(self, cmd2: u8) -> InsteonError {
        match (self, cmd2) {
            (EngineVersion::I2Cs, 0xfb) => InsteonError::IllegalValue,
            (EngineVersion::I2Cs, 0xfc) => InsteonError::PreNak,
            (EngineVersion::I2Cs, 0xfd) => InsteonError::IncorrectChecksum,
            (_, 0xfd) => InsteonError::UnknownCommand,
            (_, 0xfe) => InsteonError::NoLoadDetected,
            (_, 0xff) => InsteonError::NotLinked,
            _ => InsteonError::UnexpectedResponse,
        }
    }
}

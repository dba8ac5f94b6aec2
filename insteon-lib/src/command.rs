use std::fmt;
use std::hash::{Hash, Hasher};

/// An Insteon command word.
///
/// Three logical bytes: `[class, cmd1, cmd2]`. The class byte is `0x00` for
/// commands carried by standard messages and `0x01` for commands carried by
/// extended messages; `cmd1` and `cmd2` are the two command bytes on the
/// wire. Bytes 0 and 1 form the command code, byte 2 is the sub-command
/// (usually an argument such as a group number).
///
/// Equality and hashing only look at the command code: a response to
/// "enter linking mode for group 3" still compares equal to
/// [`CMD_ENTER_LINKING_MODE`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Command([u8; 3]);

impl Command {
    pub const fn standard(cmd1: u8, cmd2: u8) -> Self {
        Command([0x00, cmd1, cmd2])
    }

    pub const fn extended(cmd1: u8, cmd2: u8) -> Self {
        Command([0x01, cmd1, cmd2])
    }

    pub const fn from_bytes(bytes: [u8; 3]) -> Self {
        Command(bytes)
    }

    /// Return a copy of this command with the sub-command byte set to `value`.
    pub const fn sub_command(self, value: u8) -> Self {
        Command([self.0[0], self.0[1], value])
    }

    pub const fn is_extended(&self) -> bool {
        self.0[0] != 0
    }

    pub const fn cmd1(&self) -> u8 {
        self.0[1]
    }

    pub const fn cmd2(&self) -> u8 {
        self.0[2]
    }

    pub const fn bytes(&self) -> [u8; 3] {
        self.0
    }
}

impl PartialEq for Command {
    fn eq(&self, other: &Self) -> bool {
        self.0[..2] == other.0[..2]
    }
}

impl Eq for Command {}

impl Hash for Command {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0[..2].hash(state);
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}.{:02x}.{:02x}", self.0[0], self.0[1], self.0[2])
    }
}

// Standard direct commands
pub const CMD_ASSIGN_TO_ALL_LINK_GROUP: Command = Command::standard(0x01, 0x00);
pub const CMD_DELETE_FROM_ALL_LINK_GROUP: Command = Command::standard(0x02, 0x00);
pub const CMD_PRODUCT_DATA_REQ: Command = Command::standard(0x03, 0x00);
pub const CMD_FX_USERNAME_REQ: Command = Command::standard(0x03, 0x01);
pub const CMD_DEVICE_TEXT_STRING_REQ: Command = Command::standard(0x03, 0x02);
pub const CMD_EXIT_LINKING_MODE: Command = Command::standard(0x08, 0x00);
pub const CMD_ENTER_LINKING_MODE: Command = Command::standard(0x09, 0x00);
pub const CMD_ENTER_UNLINKING_MODE: Command = Command::standard(0x0a, 0x00);
pub const CMD_GET_ENGINE_VERSION: Command = Command::standard(0x0d, 0x00);
pub const CMD_PING: Command = Command::standard(0x0f, 0x00);
pub const CMD_ID_REQUEST: Command = Command::standard(0x10, 0x00);
pub const CMD_LIGHT_ON: Command = Command::standard(0x11, 0xff);
pub const CMD_LIGHT_OFF: Command = Command::standard(0x13, 0x00);
pub const CMD_LIGHT_STATUS_REQUEST: Command = Command::standard(0x19, 0x00);
pub const CMD_GET_OPERATING_FLAGS: Command = Command::standard(0x1f, 0x00);
pub const CMD_SET_OPERATING_FLAGS: Command = Command::standard(0x20, 0x00);

// Broadcast commands
pub const CMD_SET_BUTTON_PRESSED_RESPONDER: Command = Command::standard(0x01, 0x00);
pub const CMD_SET_BUTTON_PRESSED_CONTROLLER: Command = Command::standard(0x02, 0x00);

// Extended direct commands
pub const CMD_PRODUCT_DATA_RESP: Command = Command::extended(0x03, 0x00);
pub const CMD_SET_DEVICE_TEXT_STRING: Command = Command::extended(0x03, 0x03);
pub const CMD_ENTER_LINKING_MODE_EXT: Command = Command::extended(0x09, 0x00);
pub const CMD_EXTENDED_GET_SET: Command = Command::extended(0x2e, 0x00);
pub const CMD_READ_WRITE_ALDB: Command = Command::extended(0x2f, 0x00);

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn sub_command_keeps_code() {
        let cmd = CMD_ENTER_LINKING_MODE.sub_command(0x01);
        assert_eq!(cmd.bytes(), [0x00, 0x09, 0x01]);
        assert_eq!(cmd, CMD_ENTER_LINKING_MODE);
        assert_eq!(cmd.cmd1(), 0x09);
        assert_eq!(cmd.cmd2(), 0x01);
    }

    #[test]
    fn equality_ignores_sub_command_only() {
        assert_eq!(Command::standard(0x01, 0x01), Command::standard(0x01, 0xff));
        assert_ne!(Command::standard(0x01, 0x00), Command::standard(0x02, 0x00));
        assert_ne!(CMD_ENTER_LINKING_MODE, CMD_ENTER_LINKING_MODE_EXT);

        let set: HashSet<Command> = [CMD_PING, CMD_PING.sub_command(7)].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn display() {
        assert_eq!(CMD_READ_WRITE_ALDB.to_string(), "01.2f.00");
        assert!(CMD_READ_WRITE_ALDB.is_extended());
        assert!(!CMD_PING.is_extended());
    }
}

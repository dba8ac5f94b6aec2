//! All-Link database records.

use crate::address::Address;
use crate::error::InsteonError;
use std::fmt;
use std::str::FromStr;

/// Control byte of a link record: bit 7 in use, bit 6 controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RecordControlFlags(pub u8);

impl RecordControlFlags {
    const IN_USE: u8 = 0x80;
    const CONTROLLER: u8 = 0x40;

    pub const AVAILABLE_RESPONDER: RecordControlFlags = RecordControlFlags(0x00);
    pub const AVAILABLE_CONTROLLER: RecordControlFlags = RecordControlFlags(0x40);
    pub const USED_RESPONDER: RecordControlFlags = RecordControlFlags(0x80);
    pub const USED_CONTROLLER: RecordControlFlags = RecordControlFlags(0xc0);

    pub fn in_use(self) -> bool {
        self.0 & Self::IN_USE != 0
    }

    pub fn available(self) -> bool {
        !self.in_use()
    }

    pub fn controller(self) -> bool {
        self.0 & Self::CONTROLLER != 0
    }

    pub fn responder(self) -> bool {
        !self.controller()
    }

    pub fn set_in_use(&mut self) {
        self.0 |= Self::IN_USE;
    }

    pub fn set_available(&mut self) {
        self.0 &= !Self::IN_USE;
    }

    pub fn set_controller(&mut self) {
        self.0 |= Self::CONTROLLER;
    }

    pub fn set_responder(&mut self) {
        self.0 &= !Self::CONTROLLER;
    }
}

impl fmt::Display for RecordControlFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let usage = if self.in_use() { 'U' } else { 'A' };
        let role = if self.controller() { 'C' } else { 'R' };
        write!(f, "{usage}{role}")
    }
}

impl FromStr for RecordControlFlags {
    type Err = InsteonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let chars: Vec<char> = s.chars().collect();
        if chars.len() != 2 {
            return Err(InsteonError::FlagsLength(chars.len()));
        }

        let mut flags = RecordControlFlags::default();
        match chars[0] {
            'A' | 'a' => flags.set_available(),
            'U' | 'u' => flags.set_in_use(),
            _ => return Err(InsteonError::AvailableFlag),
        }
        match chars[1] {
            'R' | 'r' => flags.set_responder(),
            'C' | 'c' => flags.set_controller(),
            _ => return Err(InsteonError::ControllerFlag),
        }
        Ok(flags)
    }
}

/// All-Link group number, 1 to 255.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Group(pub u8);

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for Group {
    type Err = InsteonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: i64 = s.trim().parse().map_err(|_| InsteonError::InvalidNumber)?;
        match u8::try_from(value) {
            Ok(group) if group >= 1 => Ok(Group(group)),
            _ => Err(InsteonError::GroupRange),
        }
    }
}

/// One entry of an All-Link database.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkRecord {
    /// Slot in a device ALDB; zero for modem records.
    pub mem_address: u16,
    pub flags: RecordControlFlags,
    pub group: Group,
    pub address: Address,
    pub data: [u8; 3],
}

impl LinkRecord {
    pub const LEN: usize = 8;

    pub fn new(flags: RecordControlFlags, group: Group, address: Address, data: [u8; 3]) -> Self {
        LinkRecord {
            mem_address: 0,
            flags,
            group,
            address,
            data,
        }
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, InsteonError> {
        if buf.len() < Self::LEN {
            return Err(InsteonError::BufferTooShort {
                expected: Self::LEN,
                actual: buf.len(),
            });
        }
        Ok(LinkRecord {
            mem_address: 0,
            flags: RecordControlFlags(buf[0]),
            group: Group(buf[1]),
            address: Address([buf[2], buf[3], buf[4]]),
            data: [buf[5], buf[6], buf[7]],
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let a = self.address.0;
        [
            self.flags.0,
            self.group.0,
            a[0],
            a[1],
            a[2],
            self.data[0],
            self.data[1],
            self.data[2],
        ]
    }

    /// A device ALDB ends at the first record with a clear control byte.
    pub fn is_end_of_database(&self) -> bool {
        self.flags.0 == 0
    }

    /// True when both records share group and address, whatever the role.
    pub fn same_target(&self, other: &LinkRecord) -> bool {
        self.group == other.group && self.address == other.address
    }

    /// Column aligned text form, the inverse of [`FromStr`].
    pub fn to_text(&self) -> String {
        format!(
            "{} {:>8} {}   {:02x} {:02x} {:02x}",
            self.flags, self.group.0, self.address, self.data[0], self.data[1], self.data[2]
        )
    }
}

impl PartialEq for LinkRecord {
    fn eq(&self, other: &Self) -> bool {
        self.flags.in_use() == other.flags.in_use()
            && self.flags.controller() == other.flags.controller()
            && self.group == other.group
            && self.address == other.address
    }
}

impl Eq for LinkRecord {}

impl TryFrom<&[u8]> for LinkRecord {
    type Error = InsteonError;

    fn try_from(buf: &[u8]) -> Result<Self, Self::Error> {
        LinkRecord::from_bytes(buf)
    }
}

impl fmt::Display for LinkRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} 0x{:02x} 0x{:02x} 0x{:02x}",
            self.flags, self.group, self.address, self.data[0], self.data[1], self.data[2]
        )
    }
}

impl FromStr for LinkRecord {
    type Err = InsteonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        if fields.len() != 6 {
            return Err(InsteonError::FieldCount {
                expected: 6,
                actual: fields.len(),
            });
        }

        let mut data = [0u8; 3];
        for (slot, field) in data.iter_mut().zip(&fields[3..]) {
            let digits = field.strip_prefix("0x").unwrap_or(field);
            *slot = u8::from_str_radix(digits, 16).map_err(|_| InsteonError::InvalidNumber)?;
        }

        Ok(LinkRecord {
            mem_address: 0,
            flags: fields[0].parse()?,
            group: fields[1].parse()?,
            address: fields[2].parse()?,
            data,
        })
    }
}

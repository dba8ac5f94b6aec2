//! Identification values: device addresses and the device category/product
//! fields returned by product data requests.

use crate::error::InsteonError;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::fmt;
use std::str::FromStr;

/// Scan exactly `N` dot separated two digit hex fields (`01.b4.a5`).
///
/// On failure the error reports how many leading fields were understood.
pub(crate) fn scan_hex_fields<const N: usize>(s: &str) -> Result<[u8; N], InsteonError> {
    let mut out = [0u8; N];
    let mut parsed = 0;
    for (i, field) in s.split('.').enumerate() {
        let valid = i < N && field.len() == 2 && field.bytes().all(|b| b.is_ascii_hexdigit());
        if !valid {
            return Err(InsteonError::HexFields { expected: N, actual: parsed });
        }
        out[i] = u8::from_str_radix(field, 16).map_err(|_| InsteonError::HexFields { expected: N, actual: parsed })?;
        parsed += 1;
    }
    if parsed != N {
        return Err(InsteonError::HexFields { expected: N, actual: parsed });
    }
    Ok(out)
}

/// A 3 byte Insteon address.
///
/// The text form is the one printed on device labels: `xx.xx.xx`, lower case,
/// zero padded, always 8 characters long.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 3]);

impl Address {
    pub const fn new(b1: u8, b2: u8, b3: u8) -> Self {
        Address([b1, b2, b3])
    }

    pub fn as_bytes(&self) -> &[u8; 3] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}.{:02x}.{:02x}", self.0[0], self.0[1], self.0[2])
    }
}

impl FromStr for Address {
    type Err = InsteonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        scan_hex_fields::<3>(s.trim())
            .map(Address)
            .map_err(|_| InsteonError::AddressFormat)
    }
}

impl From<[u8; 3]> for Address {
    fn from(bytes: [u8; 3]) -> Self {
        Address(bytes)
    }
}

impl TryFrom<&[u8]> for Address {
    type Error = InsteonError;

    fn try_from(buf: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; 3] = buf
            .get(..3)
            .and_then(|b| b.try_into().ok())
            .ok_or(InsteonError::BufferTooShort {
                expected: 3,
                actual: buf.len(),
            })?;
        Ok(Address(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        scan_hex_fields::<3>(&s).map(Address).map_err(de::Error::custom)
    }
}

/// Device category, the first byte of a [`DevCat`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Category(pub u8);

/// Device sub category, the second byte of a [`DevCat`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubCategory(pub u8);

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}", self.0)
    }
}

impl fmt::Display for SubCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}", self.0)
    }
}

/// Category and sub category pair reported by a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DevCat(pub [u8; 2]);

impl DevCat {
    pub fn category(&self) -> Category {
        Category(self.0[0])
    }

    pub fn sub_category(&self) -> SubCategory {
        SubCategory(self.0[1])
    }
}

impl fmt::Display for DevCat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}.{:02x}", self.0[0], self.0[1])
    }
}

impl FromStr for DevCat {
    type Err = InsteonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        scan_hex_fields::<2>(s.trim()).map(DevCat)
    }
}

impl Serialize for DevCat {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DevCat {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        scan_hex_fields::<2>(&s).map(DevCat).map_err(de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductKey(pub [u8; 3]);

impl fmt::Display for ProductKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x}{:02x}{:02x}", self.0[0], self.0[1], self.0[2])
    }
}

/// Product key and device category, as carried by a product data response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProductData {
    pub key: ProductKey,
    pub devcat: DevCat,
}

impl ProductData {
    /// Extended payload length needed to decode a product data response.
    pub const PAYLOAD_LEN: usize = 14;

    pub fn to_bytes(&self) -> [u8; 7] {
        let mut buf = [0u8; 7];
        buf[1..4].copy_from_slice(&self.key.0);
        buf[4..6].copy_from_slice(&self.devcat.0);
        buf[6] = 0xff;
        buf
    }
}

impl TryFrom<&[u8]> for ProductData {
    type Error = InsteonError;

    fn try_from(buf: &[u8]) -> Result<Self, Self::Error> {
        if buf.len() < Self::PAYLOAD_LEN {
            return Err(InsteonError::BufferTooShort {
                expected: Self::PAYLOAD_LEN,
                actual: buf.len(),
            });
        }
        Ok(ProductData {
            key: ProductKey([buf[1], buf[2], buf[3]]),
            devcat: DevCat([buf[4], buf[5]]),
        })
    }
}

impl fmt::Display for ProductData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DevCat:{} Product Key:{}", self.devcat, self.key)
    }
}

use std::fmt;
use std::io;
use std::str::FromStr;

use hex::FromHexError;

use hash::SerializeContent;

const ADDRESS_LENGTH: usize = 20;

/// A 20-byte account identifier.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address([u8; ADDRESS_LENGTH]);

impl Address {
    pub const SIZE: usize = ADDRESS_LENGTH;

    pub fn from_bytes(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Address(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }
}

impl From<&[u8]> for Address {
    fn from(slice: &[u8]) -> Self {
        assert_eq!(slice.len(), ADDRESS_LENGTH, "Tried to create instance with slice of wrong length");
        let mut bytes = [0u8; ADDRESS_LENGTH];
        bytes.copy_from_slice(slice);
        Address(bytes)
    }
}

impl FromStr for Address {
    type Err = FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let vec = hex::decode(s)?;
        if vec.len() != ADDRESS_LENGTH {
            return Err(FromHexError::InvalidStringLength);
        }
        Ok(Address::from(vec.as_slice()))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl SerializeContent for Address {
    fn serialize_content<W: io::Write>(&self, writer: &mut W) -> io::Result<usize> {
        writer.write_all(&self.0)?;
        Ok(ADDRESS_LENGTH)
    }
}

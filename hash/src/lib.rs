use std::fmt;
use std::io;
use std::str::FromStr;

use blake2_rfc::blake2b::Blake2b;
use hex::FromHexError;

/// Streaming hasher. `io::Write` lets arbitrary content be fed through the
/// `SerializeContent` machinery.
pub trait Hasher: Default + io::Write {
    type Output: HashOutput;

    fn finish(self) -> Self::Output;

    fn digest(mut self, bytes: &[u8]) -> Self::Output {
        self.write_all(bytes).unwrap();
        self.finish()
    }

    fn hash<T: SerializeContent>(&mut self, h: &T) -> &mut Self {
        h.serialize_content(self).unwrap();
        self
    }

    fn chain<T: SerializeContent>(mut self, h: &T) -> Self {
        self.hash(h);
        self
    }
}

/// Defines which bytes of a value are covered by its content hash.
pub trait SerializeContent {
    fn serialize_content<W: io::Write>(&self, writer: &mut W) -> io::Result<usize>;
}

pub trait Hash: SerializeContent {
    fn hash<H: HashOutput>(&self) -> H {
        let mut h = H::Builder::default();
        self.serialize_content(&mut h).unwrap();
        h.finish()
    }
}

pub trait HashOutput:
    PartialEq + Eq + Clone + Sized + SerializeContent + fmt::Debug + std::hash::Hash
{
    type Builder: Hasher<Output = Self>;

    fn as_bytes(&self) -> &[u8];
    fn len() -> usize;
}

impl<H> SerializeContent for H
where
    H: HashOutput,
{
    fn serialize_content<W: io::Write>(&self, writer: &mut W) -> io::Result<usize> {
        writer.write_all(self.as_bytes())?;
        Ok(Self::len())
    }
}

// Blake2b

const BLAKE2B_LENGTH: usize = 32;

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, std::hash::Hash, Default)]
pub struct Blake2bHash([u8; BLAKE2B_LENGTH]);

impl Blake2bHash {
    pub const SIZE: usize = BLAKE2B_LENGTH;

    pub fn from_bytes(bytes: [u8; BLAKE2B_LENGTH]) -> Self {
        Blake2bHash(bytes)
    }
}

impl From<&[u8]> for Blake2bHash {
    fn from(slice: &[u8]) -> Self {
        assert_eq!(slice.len(), BLAKE2B_LENGTH, "Tried to create instance with slice of wrong length");
        let mut bytes = [0u8; BLAKE2B_LENGTH];
        bytes.copy_from_slice(slice);
        Blake2bHash(bytes)
    }
}

impl AsRef<[u8]> for Blake2bHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl FromStr for Blake2bHash {
    type Err = FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let vec = hex::decode(s)?;
        if vec.len() != BLAKE2B_LENGTH {
            return Err(FromHexError::InvalidStringLength);
        }
        Ok(Blake2bHash::from(vec.as_slice()))
    }
}

impl fmt::Display for Blake2bHash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Blake2bHash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl HashOutput for Blake2bHash {
    type Builder = Blake2bHasher;

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    fn len() -> usize {
        BLAKE2B_LENGTH
    }
}

pub struct Blake2bHasher(Blake2b);

impl Blake2bHasher {
    pub fn new() -> Self {
        Blake2bHasher(Blake2b::new(BLAKE2B_LENGTH))
    }
}

impl Default for Blake2bHasher {
    fn default() -> Self {
        Blake2bHasher::new()
    }
}

impl io::Write for Blake2bHasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Hasher for Blake2bHasher {
    type Output = Blake2bHash;

    fn finish(self) -> Blake2bHash {
        let result = self.0.finalize();
        Blake2bHash::from(result.as_bytes())
    }
}

impl SerializeContent for [u8] {
    fn serialize_content<W: io::Write>(&self, writer: &mut W) -> io::Result<usize> {
        writer.write_all(self)?;
        Ok(self.len())
    }
}

impl SerializeContent for Vec<u8> {
    fn serialize_content<W: io::Write>(&self, writer: &mut W) -> io::Result<usize> {
        writer.write_all(self)?;
        Ok(self.len())
    }
}

impl Hash for [u8] {}
impl Hash for Vec<u8> {}

//! Position-tracked byte buffer used for every wire read and write.
//!
//! All integers are big-endian. Strings are CP-1252 style single-byte text,
//! terminated by a zero byte (`jstr`); the `jstr2` form carries an extra
//! leading version byte that must be zero.

use thiserror::Error;

/// Errors raised while reading from a [`Packet`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("buffer underflow: needed {needed} bytes at {pos}, {available} available")]
    Underflow {
        pos: usize,
        needed: usize,
        available: usize,
    },

    #[error("string at {pos} is missing its terminator")]
    UnterminatedString { pos: usize },

    #[error("jstr2 version byte was {0}, expected 0")]
    InvalidStringVersion(u8),

    #[error("{len} bytes do not fit a length prefix of at most {max}")]
    Oversize { len: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, PacketError>;

/// A growable byte buffer with a read/write cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packet {
    data: Vec<u8>,
    pub pos: usize,
}

impl Packet {
    /// Creates an empty packet for writing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty packet with room for `capacity` bytes.
    pub fn alloc(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            pos: 0,
        }
    }

    /// Wraps existing bytes for reading, cursor at the start.
    pub fn wrap(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes left between the cursor and the end of the buffer.
    pub fn available(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    fn take(&mut self, n: usize) -> Result<&[u8]> {
        if self.available() < n {
            return Err(PacketError::Underflow {
                pos: self.pos,
                needed: n,
                available: self.available(),
            });
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.data[start..start + n])
    }

    fn read_be(&mut self, n: usize) -> Result<u64> {
        Ok(self
            .take(n)?
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }

    /// Advances the cursor over `n` bytes the caller does not inspect.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    pub fn g1(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn gbool(&mut self) -> Result<bool> {
        Ok(self.g1()? == 1)
    }

    pub fn g2(&mut self) -> Result<u16> {
        Ok(self.read_be(2)? as u16)
    }

    pub fn g3(&mut self) -> Result<u32> {
        Ok(self.read_be(3)? as u32)
    }

    pub fn g4(&mut self) -> Result<u32> {
        Ok(self.read_be(4)? as u32)
    }

    pub fn g8(&mut self) -> Result<u64> {
        self.read_be(8)
    }

    /// Reads a zero-terminated string.
    pub fn gjstr(&mut self) -> Result<String> {
        let start = self.pos;
        let end = self.data[start.min(self.data.len())..]
            .iter()
            .position(|b| *b == 0)
            .ok_or(PacketError::UnterminatedString { pos: start })?;
        let text = self.data[start..start + end]
            .iter()
            .map(|b| char::from(*b))
            .collect();
        self.pos = start + end + 1;
        Ok(text)
    }

    /// Reads a versioned zero-terminated string.
    pub fn gjstr2(&mut self) -> Result<String> {
        let version = self.g1()?;
        if version != 0 {
            return Err(PacketError::InvalidStringVersion(version));
        }
        self.gjstr()
    }

    /// Splits off the next `n` bytes as an independent packet.
    pub fn gpacket(&mut self, n: usize) -> Result<Packet> {
        Ok(Packet::wrap(self.take(n)?.to_vec()))
    }

    /// Returns the next `n` bytes without copying them into a new packet.
    pub fn gdata(&mut self, n: usize) -> Result<&[u8]> {
        self.take(n)
    }

    fn write_be(&mut self, value: u64, n: usize) {
        for shift in (0..n).rev() {
            self.data.push((value >> (shift * 8)) as u8);
        }
        self.pos = self.data.len();
    }

    pub fn p1(&mut self, value: u8) {
        self.write_be(u64::from(value), 1);
    }

    pub fn pbool(&mut self, value: bool) {
        self.p1(u8::from(value));
    }

    pub fn p2(&mut self, value: u16) {
        self.write_be(u64::from(value), 2);
    }

    pub fn p3(&mut self, value: u32) {
        self.write_be(u64::from(value), 3);
    }

    pub fn p4(&mut self, value: u32) {
        self.write_be(u64::from(value), 4);
    }

    pub fn p5(&mut self, value: u64) {
        self.write_be(value, 5);
    }

    pub fn p8(&mut self, value: u64) {
        self.write_be(value, 8);
    }

    pub fn pjstr(&mut self, value: &str) {
        // Characters outside a single byte are replaced, the client has no wider charset.
        self.data
            .extend(value.chars().map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?')));
        self.data.push(0);
        self.pos = self.data.len();
    }

    pub fn pjstr2(&mut self, value: &str) {
        self.p1(0);
        self.pjstr(value);
    }

    pub fn pdata(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
        self.pos = self.data.len();
    }

    /// Back-fills a one-byte length immediately before the last `len` bytes.
    ///
    /// Fails without touching the buffer if `len` does not fit in a byte.
    pub fn psize1(&mut self, len: usize) -> Result<()> {
        let size = u8::try_from(len).map_err(|_| PacketError::Oversize {
            len,
            max: usize::from(u8::MAX),
        })?;
        let at = self.data.len() - len - 1;
        self.data[at] = size;
        Ok(())
    }

    /// Back-fills a two-byte length immediately before the last `len` bytes.
    pub fn psize2(&mut self, len: usize) -> Result<()> {
        let size = u16::try_from(len).map_err(|_| PacketError::Oversize {
            len,
            max: usize::from(u16::MAX),
        })?;
        let at = self.data.len() - len - 2;
        self.data[at..at + 2].copy_from_slice(&size.to_be_bytes());
        Ok(())
    }
}

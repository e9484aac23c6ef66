//! Bounds-checked cursor over untrusted bytes.
//!
//! Every accessor validates the remaining length before it consumes
//! anything and reports a shortfall as `None`, so protocol parsers can
//! chain reads with `?` and never index past the end of a packet.

/// Forward-only reader over a borrowed byte slice.
///
/// The reader owns only its position. The slice it reads from is never
/// modified, so dropping a reader (on success or on a failed read) leaves
/// the caller's data exactly as it was.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Create a reader positioned at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current offset from the start of the slice.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// True once every byte has been consumed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Read one byte.
    #[inline]
    pub fn u8(&mut self) -> Option<u8> {
        let byte = *self.data.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }

    /// Read a big-endian 16-bit value.
    #[inline]
    pub fn u16(&mut self) -> Option<u16> {
        let bytes = self.take(2)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    /// Read a big-endian 24-bit value (TLS handshake lengths).
    #[inline]
    pub fn u24(&mut self) -> Option<u32> {
        let bytes = self.take(3)?;
        Some(u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]))
    }

    /// Borrow the next `len` bytes and advance past them.
    #[inline]
    pub fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let bytes = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(bytes)
    }

    /// Advance past `len` bytes without looking at them.
    #[inline]
    pub fn skip(&mut self, len: usize) -> Option<()> {
        self.take(len).map(|_| ())
    }

    /// Skip a block whose length is given by a leading one-byte prefix.
    pub fn skip_u8_prefixed(&mut self) -> Option<()> {
        let len = self.u8()?;
        self.skip(usize::from(len))
    }

    /// Skip a block whose length is given by a leading two-byte prefix.
    pub fn skip_u16_prefixed(&mut self) -> Option<()> {
        let len = self.u16()?;
        self.skip(usize::from(len))
    }
}

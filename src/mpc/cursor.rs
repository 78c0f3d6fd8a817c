//! Bounds-checked big-endian access to wire buffers
//!
//! Every read goes through [`ByteView`], which refuses offsets or lengths
//! that fall outside the underlying slice. Writes go through
//! [`ByteWriter`], which only ever appends.

use super::CodecError;

/// Read-only view over a wire buffer
#[derive(Debug, Clone, Copy)]
pub struct ByteView<'a> {
    buf: &'a [u8],
}

impl<'a> ByteView<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.buf
    }

    /// Sub-slice `[off, off + len)`
    pub fn slice(&self, off: usize, len: usize) -> Result<&'a [u8], CodecError> {
        let end = off.checked_add(len).ok_or(CodecError::OutOfBounds { offset: off, len })?;
        self.buf.get(off..end).ok_or(CodecError::OutOfBounds { offset: off, len })
    }

    /// View starting at `off` and running to the end of the buffer
    pub fn tail(&self, off: usize) -> Result<ByteView<'a>, CodecError> {
        self.buf
            .get(off..)
            .map(ByteView::new)
            .ok_or(CodecError::OutOfBounds { offset: off, len: 0 })
    }

    fn array<const N: usize>(&self, off: usize) -> Result<[u8; N], CodecError> {
        let s = self.slice(off, N)?;
        let mut a = [0u8; N];
        a.copy_from_slice(s);
        Ok(a)
    }

    pub fn u8_at(&self, off: usize) -> Result<u8, CodecError> {
        self.buf.get(off).copied().ok_or(CodecError::OutOfBounds { offset: off, len: 1 })
    }

    pub fn u16_at(&self, off: usize) -> Result<u16, CodecError> {
        Ok(u16::from_be_bytes(self.array(off)?))
    }

    /// 3-byte big-endian length field
    pub fn u24_at(&self, off: usize) -> Result<u32, CodecError> {
        let b: [u8; 3] = self.array(off)?;
        Ok(((b[0] as u32) << 16) | ((b[1] as u32) << 8) | b[2] as u32)
    }

    pub fn u32_at(&self, off: usize) -> Result<u32, CodecError> {
        Ok(u32::from_be_bytes(self.array(off)?))
    }

    pub fn u64_at(&self, off: usize) -> Result<u64, CodecError> {
        Ok(u64::from_be_bytes(self.array(off)?))
    }

    pub fn array_at<const N: usize>(&self, off: usize) -> Result<[u8; N], CodecError> {
        self.array(off)
    }
}

/// Append-only big-endian writer
#[derive(Debug, Default, Clone)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self { buf: Vec::with_capacity(cap) }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn put_u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn put_u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    /// Low 24 bits of `v`
    pub fn put_u24(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes()[1..]);
        self
    }

    pub fn put_u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn put_u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn put_bytes(&mut self, data: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(data);
        self
    }

    pub fn put_zeros(&mut self, n: usize) -> &mut Self {
        self.buf.resize(self.buf.len() + n, 0);
        self
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

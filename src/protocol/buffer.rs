//! Socket read buffer and byte cursor
//!
//! `FastBuffer` accumulates bytes from any `AsyncRead` and only hands them
//! out after `grow()` has guaranteed enough are present. `ByteReader` is a
//! non-consuming cursor used to peek at headers before committing to them.

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

/// Default initial capacity
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Hard upper bound on buffered bytes
pub const MAX_BUFFER_SIZE: usize = 32 * 1024 * 1024;

/// Growable read buffer with require-before-read semantics
#[derive(Debug)]
pub struct FastBuffer {
    buf: BytesMut,
    max_size: usize,
    total_read: u64,
}

impl FastBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            max_size: MAX_BUFFER_SIZE,
            total_read: 0,
        }
    }

    /// Cap the number of bytes `grow()` may buffer
    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
    }

    /// Read from `reader` until at least `required` bytes are buffered.
    ///
    /// EOF before that point is `Error::ConnectionClosed`.
    pub async fn grow<R>(&mut self, reader: &mut R, required: usize) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        if required > self.max_size {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("read of {} bytes exceeds buffer limit {}", required, self.max_size),
            )));
        }

        while self.buf.len() < required {
            self.fill(reader).await?;
        }
        Ok(())
    }

    /// One read from `reader`, appending whatever arrives
    pub async fn fill<R>(&mut self, reader: &mut R) -> Result<usize>
    where
        R: AsyncRead + Unpin,
    {
        let n = reader.read_buf(&mut self.buf).await?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
        self.total_read += n as u64;
        Ok(n)
    }

    /// Whether `n` bytes can be read without touching the socket
    pub fn require(&self, n: usize) -> bool {
        self.buf.len() >= n
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes pulled off the socket since creation
    pub fn total_read(&self) -> u64 {
        self.total_read
    }

    /// Buffered bytes, for sans-IO decoders that consume in place
    pub fn bytes_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        Ok(self.buf.get_u32())
    }

    /// Split off exactly `n` buffered bytes
    pub fn read_bytes(&mut self, n: usize) -> Result<Bytes> {
        self.ensure(n)?;
        Ok(self.buf.split_to(n).freeze())
    }

    fn ensure(&self, n: usize) -> Result<()> {
        if self.buf.len() < n {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("need {} bytes, have {}", n, self.buf.len()),
            )));
        }
        Ok(())
    }
}

impl Default for FastBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Non-consuming cursor over a byte slice.
///
/// Every read returns `None` on underrun so callers can report
/// "need more data" without having consumed anything.
#[derive(Debug, Clone, Copy)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes consumed so far
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        let b = *self.data.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    pub fn read_u16(&mut self) -> Option<u16> {
        let b = self.take(2)?;
        Some(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u24(&mut self) -> Option<u32> {
        let b = self.take(3)?;
        Some(u32::from_be_bytes([0, b[0], b[1], b[2]]))
    }

    pub fn read_u32(&mut self) -> Option<u32> {
        let b = self.take(4)?;
        Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u32_le(&mut self) -> Option<u32> {
        let b = self.take(4)?;
        Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Look at the next 4 bytes as a big-endian u32 without advancing
    pub fn peek_u32(&self) -> Option<u32> {
        let mut copy = *self;
        copy.read_u32()
    }

    pub fn skip(&mut self, n: usize) -> Option<()> {
        self.take(n).map(|_| ())
    }

    pub fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.remaining() < n {
            return None;
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Some(slice)
    }
}

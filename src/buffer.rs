//! Read buffer and decode cursor for ESL frame parsing

use crate::{
    constants::*,
    error::{EslError, EslResult},
};
use bytes::{Buf, Bytes, BytesMut};

/// Bytes received from the peer and not yet consumed by the decoder.
pub struct EslBuffer {
    buffer: BytesMut,
    position: usize,
}

impl EslBuffer {
    /// Create new buffer with default capacity
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(BUF_CHUNK),
            position: 0,
        }
    }

    /// Buffer over an already complete byte region, used for nested frames
    pub fn from_bytes(data: &[u8]) -> Self {
        Self {
            buffer: BytesMut::from(data),
            position: 0,
        }
    }

    /// Number of unconsumed bytes
    pub fn len(&self) -> usize {
        self.buffer
            .len()
            - self.position
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Extend buffer with more data
    pub fn extend_from_slice(&mut self, data: &[u8]) {
        if self
            .buffer
            .capacity()
            - self
                .buffer
                .len()
            < data.len()
        {
            let old_cap = self
                .buffer
                .capacity();
            self.buffer
                .reserve(
                    data.len()
                        .max(BUF_CHUNK),
                );
            tracing::trace!(
                "Buffer grew from {} to {} bytes",
                old_cap,
                self.buffer
                    .capacity()
            );
        }
        self.buffer
            .extend_from_slice(data);
    }

    /// Unconsumed data
    pub fn data(&self) -> &[u8] {
        &self.buffer[self.position..]
    }

    /// Consume bytes from the front of buffer.
    ///
    /// Returns `Err` if `count` exceeds the available data.
    pub fn advance(&mut self, count: usize) -> EslResult<()> {
        let available = self.len();
        if count > available {
            return Err(EslError::ReadBody(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("cannot advance {} bytes, only {} available", count, available),
            )));
        }
        self.position += count;
        Ok(())
    }

    /// Drop up to `count` bytes, returning how many were dropped.
    pub fn discard(&mut self, count: usize) -> usize {
        let dropped = count.min(self.len());
        self.position += dropped;
        self.compact();
        dropped
    }

    /// Locate the blank line ending a header block.
    ///
    /// Returns the length of the header lines (without the blank line) and
    /// the total number of bytes the block occupies. Lines may end in `\n`
    /// or `\r\n`.
    pub fn find_header_end(&self) -> Option<(usize, usize)> {
        let data = self.data();
        if data.starts_with(b"\n") {
            return Some((0, 1));
        }
        if data.starts_with(b"\r\n") {
            return Some((0, 2));
        }

        let mut from = 0;
        while let Some(offset) = data[from..]
            .iter()
            .position(|&b| b == b'\n')
        {
            let newline = from + offset;
            let rest = &data[newline + 1..];
            if rest.starts_with(b"\n") {
                return Some((newline, newline + 2));
            }
            if rest.starts_with(b"\r\n") {
                return Some((newline, newline + 3));
            }
            from = newline + 1;
        }
        None
    }

    /// Take a complete header block (without its terminating blank line)
    pub fn take_header_block(&mut self) -> Option<Vec<u8>> {
        let (header_len, total) = self.find_header_end()?;
        let block = self.data()[..header_len].to_vec();
        // total <= self.len() is guaranteed by find_header_end
        self.position += total;
        self.compact();
        Some(block)
    }

    /// Extract exact number of bytes
    pub fn extract_bytes(&mut self, count: usize) -> Option<Bytes> {
        if self.len() < count {
            return None;
        }
        self.compact();
        let chunk = self
            .buffer
            .split_to(count)
            .freeze();
        Some(chunk)
    }

    /// Compact buffer by removing consumed data
    pub fn compact(&mut self) {
        if self.position > 0 {
            self.buffer
                .advance(self.position);
            self.position = 0;

            if self
                .buffer
                .capacity()
                < BUF_CHUNK
            {
                self.buffer
                    .reserve(BUF_CHUNK);
            }
        }
    }

    /// Check if buffer size exceeds reasonable limits
    pub fn check_size_limits(&self) -> std::io::Result<()> {
        if self.len() > MAX_BUFFER_SIZE {
            tracing::error!(
                "Buffer overflow: {} bytes without a complete header block (limit {})",
                self.len(),
                MAX_BUFFER_SIZE
            );
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "header block exceeds {} bytes without terminator",
                    MAX_BUFFER_SIZE
                ),
            ));
        }
        Ok(())
    }
}

impl Default for EslBuffer {
    fn default() -> Self {
        Self::new()
    }
}

//! Packet memory segment
//!
//! A segment owns one contiguous buffer laid out as
//!
//! ```text
//! +-----------+------------------------+------------+
//! | headroom  |          data          |  tailroom  |
//! +-----------+------------------------+------------+
//! 0        data_off          data_off + data_len   buf.len()
//! ```
//!
//! Only the data region belongs to the packet. Tailroom is scratch space the
//! inbound pipeline borrows to stage ESN and AAD material for the crypto
//! engine.

use crate::{Error, Result};

/// Default headroom reserved in front of packet data
pub const DEFAULT_HEADROOM: usize = 128;

/// Default tailroom reserved behind packet data
pub const DEFAULT_TAILROOM: usize = 64;

/// One contiguous piece of a packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    buf: Vec<u8>,
    data_off: usize,
    data_len: usize,
}

impl Segment {
    /// Create a segment holding `data` with default head- and tailroom
    pub fn new(data: &[u8]) -> Self {
        Self::with_room(DEFAULT_HEADROOM, data, DEFAULT_TAILROOM)
    }

    /// Create a segment with explicit headroom and tailroom
    pub fn with_room(headroom: usize, data: &[u8], tailroom: usize) -> Self {
        let mut buf = vec![0u8; headroom + data.len() + tailroom];
        buf[headroom..headroom + data.len()].copy_from_slice(data);
        Segment {
            buf,
            data_off: headroom,
            data_len: data.len(),
        }
    }

    /// Packet bytes held by this segment
    pub fn data(&self) -> &[u8] {
        &self.buf[self.data_off..self.data_off + self.data_len]
    }

    /// Mutable packet bytes held by this segment
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.data_off..self.data_off + self.data_len]
    }

    /// Number of packet bytes in this segment
    pub fn data_len(&self) -> usize {
        self.data_len
    }

    /// Free space in front of the data
    pub fn headroom(&self) -> usize {
        self.data_off
    }

    /// Free space behind the data
    pub fn tailroom(&self) -> usize {
        self.buf.len() - self.data_off - self.data_len
    }

    /// Borrow `len` bytes at `offset` from the start of data.
    ///
    /// The range may extend past the data into the tailroom.
    pub fn room(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let range = self.room_range(offset, len)?;
        Ok(&self.buf[range])
    }

    /// Mutable variant of [`Segment::room`]
    pub fn room_mut(&mut self, offset: usize, len: usize) -> Result<&mut [u8]> {
        let range = self.room_range(offset, len)?;
        Ok(&mut self.buf[range])
    }

    fn room_range(&self, offset: usize, len: usize) -> Result<std::ops::Range<usize>> {
        let limit = self.data_len + self.tailroom();
        let end = offset.checked_add(len).filter(|&end| end <= limit);
        match end {
            Some(end) => Ok(self.data_off + offset..self.data_off + end),
            None => Err(Error::BufferTooShort {
                required: offset.saturating_add(len),
                available: limit,
            }),
        }
    }

    /// Drop `len` bytes from the end of the data
    pub(crate) fn trim(&mut self, len: usize) -> Result<()> {
        if len > self.data_len {
            return Err(Error::BufferTooShort {
                required: len,
                available: self.data_len,
            });
        }
        self.data_len -= len;
        Ok(())
    }

    /// Drop `len` bytes from the start of the data
    pub(crate) fn adj(&mut self, len: usize) -> Result<()> {
        if len > self.data_len {
            return Err(Error::BufferTooShort {
                required: len,
                available: self.data_len,
            });
        }
        self.data_off += len;
        self.data_len -= len;
        Ok(())
    }
}

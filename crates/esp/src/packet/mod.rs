//! Segmented packet buffers
//!
//! A [`Packet`] is a non-empty chain of [`Segment`]s plus the receive
//! metadata the inbound pipeline consumes and updates (header lengths,
//! classification, offload flags, tx-offload word).
//!
//! All offset arithmetic in the ESP code goes through the bounds-checked
//! view methods here (`read_at`, `write_at`, `trim_head`, `trim_tail`,
//! `remove_gap`), so attacker-controlled lengths can only ever produce an
//! error, never an out-of-range access.

mod meta;
mod segment;

pub use meta::{L2Type, L3Type, OffloadFlags, PacketType, TunnelType};
pub use segment::{Segment, DEFAULT_HEADROOM, DEFAULT_TAILROOM};

use crate::{Error, Result};

/// A packet as a chain of memory segments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    segs: Vec<Segment>,

    /// Length of the outer link-layer header
    pub l2_len: usize,

    /// Length of the outer network-layer header (including IPv6 extensions)
    pub l3_len: usize,

    /// Layered classification
    pub packet_type: PacketType,

    /// Receive offload flags
    pub ol_flags: OffloadFlags,

    /// Transmit offload metadata word (header lengths for the TX path)
    pub tx_offload: u64,
}

impl Packet {
    /// Create a single-segment packet
    pub fn new(segment: Segment) -> Self {
        Packet {
            segs: vec![segment],
            l2_len: 0,
            l3_len: 0,
            packet_type: PacketType::UNKNOWN,
            ol_flags: OffloadFlags::empty(),
            tx_offload: 0,
        }
    }

    /// Create a single-segment packet with default head- and tailroom
    pub fn from_bytes(data: &[u8]) -> Self {
        Self::new(Segment::new(data))
    }

    /// Create a packet from a segment chain
    ///
    /// # Errors
    ///
    /// - `BufferTooShort` if the chain is empty
    pub fn from_segments(segs: Vec<Segment>) -> Result<Self> {
        let mut iter = segs.into_iter();
        let first = iter.next().ok_or(Error::BufferTooShort {
            required: 1,
            available: 0,
        })?;
        let mut packet = Packet::new(first);
        packet.segs.extend(iter);
        Ok(packet)
    }

    /// Set outer header lengths
    pub fn with_header_lens(mut self, l2_len: usize, l3_len: usize) -> Self {
        self.l2_len = l2_len;
        self.l3_len = l3_len;
        self
    }

    /// Set the packet classification
    pub fn with_packet_type(mut self, packet_type: PacketType) -> Self {
        self.packet_type = packet_type;
        self
    }

    /// Total packet length across all segments
    pub fn len(&self) -> usize {
        self.segs.iter().map(Segment::data_len).sum()
    }

    /// Check if packet holds no bytes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Combined outer L2 + L3 header length
    pub fn header_len(&self) -> usize {
        self.l2_len + self.l3_len
    }

    /// Segment chain
    pub fn segments(&self) -> &[Segment] {
        &self.segs
    }

    /// Number of segments
    pub fn nb_segs(&self) -> usize {
        self.segs.len()
    }

    /// Last segment of the chain
    pub fn last_segment(&self) -> &Segment {
        &self.segs[self.segs.len() - 1]
    }

    /// Mutable last segment of the chain
    pub fn last_segment_mut(&mut self) -> &mut Segment {
        let last = self.segs.len() - 1;
        &mut self.segs[last]
    }

    /// Packet offset at which the last segment's data starts
    pub fn last_segment_offset(&self) -> usize {
        self.len() - self.last_segment().data_len()
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<()> {
        let total = self.len();
        match offset.checked_add(len) {
            Some(end) if end <= total => Ok(()),
            _ => Err(Error::BufferTooShort {
                required: offset.saturating_add(len),
                available: total,
            }),
        }
    }

    /// Copy `out.len()` bytes starting at `offset` into `out`
    pub fn read_at(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        self.check_range(offset, out.len())?;

        let mut skip = offset;
        let mut done = 0;
        for seg in &self.segs {
            if done == out.len() {
                break;
            }
            let data = seg.data();
            if skip >= data.len() {
                skip -= data.len();
                continue;
            }
            let n = (data.len() - skip).min(out.len() - done);
            out[done..done + n].copy_from_slice(&data[skip..skip + n]);
            done += n;
            skip = 0;
        }
        Ok(())
    }

    /// Read a fixed-size array at `offset`
    pub fn read_array<const N: usize>(&self, offset: usize) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        self.read_at(offset, &mut out)?;
        Ok(out)
    }

    /// Read a big-endian u32 at `offset`
    pub fn read_u32_be(&self, offset: usize) -> Result<u32> {
        self.read_array::<4>(offset).map(u32::from_be_bytes)
    }

    /// Overwrite bytes starting at `offset`
    pub fn write_at(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        self.check_range(offset, data.len())?;

        let mut skip = offset;
        let mut done = 0;
        for seg in &mut self.segs {
            if done == data.len() {
                break;
            }
            let seg_data = seg.data_mut();
            if skip >= seg_data.len() {
                skip -= seg_data.len();
                continue;
            }
            let n = (seg_data.len() - skip).min(data.len() - done);
            seg_data[skip..skip + n].copy_from_slice(&data[done..done + n]);
            done += n;
            skip = 0;
        }
        Ok(())
    }

    /// Drop `len` bytes from the packet tail.
    ///
    /// The bytes must all live in the last segment.
    pub fn trim_tail(&mut self, len: usize) -> Result<()> {
        self.last_segment_mut().trim(len)
    }

    /// Drop `len` bytes from the packet head.
    ///
    /// The bytes must all live in the first segment.
    pub fn trim_head(&mut self, len: usize) -> Result<()> {
        self.segs[0].adj(len)
    }

    /// Remove `len` bytes at `offset` from the first segment.
    ///
    /// The `offset` bytes in front of the gap move forward by `len` so the
    /// packet start follows them; bytes after the gap stay in place.
    pub fn remove_gap(&mut self, offset: usize, len: usize) -> Result<()> {
        let first = &mut self.segs[0];
        let end = offset.checked_add(len).filter(|&end| end <= first.data_len());
        if end.is_none() {
            return Err(Error::BufferTooShort {
                required: offset.saturating_add(len),
                available: first.data_len(),
            });
        }
        first.data_mut().copy_within(0..offset, len);
        first.adj(len)
    }

    /// Copy the packet into one contiguous buffer
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        for seg in &self.segs {
            out.extend_from_slice(seg.data());
        }
        out
    }
}

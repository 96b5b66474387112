//! ESP wire format (RFC 4303)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+ ----
//! |               Security Parameters Index (SPI)                 | ^Auth
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+ |Cov-
//! |                      Sequence Number                          | |erage
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+ | ----
//! |                    Payload Data (variable)                    | |  ^
//! ~                                                               ~ |  |
//! |                                                               | |Conf.
//! +               +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+ |Cov-
//! |               |     Padding (0-255 bytes)                     | |erage
//! +-+-+-+-+-+-+-+-+               +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+ |  |
//! |                               |  Pad Length   | Next Header   | v  v
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+ ----
//! |         Integrity Check Value-ICV   (variable)                |
//! ~                                                               ~
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The payload data starts with the per-algorithm IV.

use crate::packet::Packet;
use crate::Result;

/// ESP header length: SPI (4) + sequence number (4)
pub const ESP_HDR_LEN: usize = 8;

/// ESP trailer length: pad length (1) + next header (1)
pub const ESP_TRAILER_LEN: usize = 2;

/// Length of the high-order ESN half inserted for ICV computation
pub const SQN_HI_LEN: usize = 4;

/// IP protocol number: IPv4-in-IP
pub const IPPROTO_IPIP: u8 = 4;

/// IP protocol number: IPv6-in-IP
pub const IPPROTO_IPV6: u8 = 41;

/// IP protocol number: ESP
pub const IPPROTO_ESP: u8 = 50;

/// Monotonic padding filler: 1, 2, 3, ..., 255 (RFC 4303 Section 2.4)
pub const ESP_PAD_BYTES: [u8; 255] = {
    let mut pad = [0u8; 255];
    let mut i = 0;
    while i < pad.len() {
        pad[i] = (i + 1) as u8;
        i += 1;
    }
    pad
};

/// Fixed ESP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EspHeader {
    /// Security Parameters Index
    pub spi: u32,
    /// Low 32 bits of the sequence number
    pub seq: u32,
}

impl EspHeader {
    /// Read the ESP header at packet offset `offset`
    ///
    /// # Errors
    ///
    /// - `BufferTooShort` if the packet ends before the header does
    pub fn read(packet: &Packet, offset: usize) -> Result<Self> {
        let raw = packet.read_array::<ESP_HDR_LEN>(offset)?;
        Ok(Self::from_bytes(raw))
    }

    /// Decode from network byte order
    pub fn from_bytes(raw: [u8; ESP_HDR_LEN]) -> Self {
        EspHeader {
            spi: u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]),
            seq: u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]),
        }
    }

    /// Encode in network byte order
    pub fn to_bytes(&self) -> [u8; ESP_HDR_LEN] {
        let mut raw = [0u8; ESP_HDR_LEN];
        raw[..4].copy_from_slice(&self.spi.to_be_bytes());
        raw[4..].copy_from_slice(&self.seq.to_be_bytes());
        raw
    }
}

/// ESP trailer, located right in front of the ICV
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EspTrailer {
    /// Number of padding bytes preceding the trailer
    pub pad_len: u8,
    /// Protocol of the protected payload
    pub next_header: u8,
}

impl EspTrailer {
    /// Decode from the two trailer bytes
    pub fn from_bytes(raw: [u8; ESP_TRAILER_LEN]) -> Self {
        EspTrailer {
            pad_len: raw[0],
            next_header: raw[1],
        }
    }
}

/// Check that `pad` matches the monotonic filler pattern
pub fn padding_valid(pad: &[u8]) -> bool {
    pad.len() <= ESP_PAD_BYTES.len() && pad == &ESP_PAD_BYTES[..pad.len()]
}

/// Calculate padding length needed for ESP
///
/// # Arguments
///
/// * `payload_len` - Length of the payload (without trailer)
/// * `align` - Alignment the payload + padding + trailer must reach
///
/// # Formula
///
/// ```text
/// (payload_len + pad_len + 2) % align == 0
/// ```
pub fn calculate_padding(payload_len: usize, align: usize) -> usize {
    let total_with_trailer = payload_len + ESP_TRAILER_LEN;
    let remainder = total_with_trailer % align;
    if remainder == 0 {
        0
    } else {
        align - remainder
    }
}

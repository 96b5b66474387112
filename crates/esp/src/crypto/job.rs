//! Crypto job descriptors
//!
//! The preparer fills one [`CryptoJob`] per surviving packet. A job only
//! describes where things are: regions are packet offsets, while the digest
//! and AAD live at offsets inside the last segment, possibly reaching into
//! its tailroom.

use crate::packet::{OffloadFlags, Packet};

/// Contiguous byte range addressed by packet offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Region {
    /// Packet offset of the first byte
    pub offset: usize,
    /// Number of bytes
    pub length: usize,
}

impl Region {
    /// Create a region
    pub fn new(offset: usize, length: usize) -> Self {
        Region { offset, length }
    }

    /// One past the last byte
    pub fn end(&self) -> usize {
        self.offset + self.length
    }
}

/// Byte range inside the last segment, measured from its data start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TailRef {
    /// Offset from the start of the last segment's data
    pub offset: usize,
    /// Number of bytes
    pub len: usize,
}

/// IV / nonce / counter block handed to the engine
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct IvBlock {
    bytes: [u8; 16],
    len: usize,
}

impl IvBlock {
    /// Maximum IV block length
    pub const MAX_LEN: usize = 16;

    /// Build an IV block from consecutive parts
    ///
    /// Parts beyond [`IvBlock::MAX_LEN`] bytes are cut off.
    pub fn from_parts(parts: &[&[u8]]) -> Self {
        let mut iv = IvBlock::default();
        for part in parts {
            let n = part.len().min(Self::MAX_LEN - iv.len);
            iv.bytes[iv.len..iv.len + n].copy_from_slice(&part[..n]);
            iv.len += n;
        }
        iv
    }

    /// IV bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// IV length
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the block is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::fmt::Debug for IvBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "IvBlock({} bytes)", self.len)
    }
}

/// Completion status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobStatus {
    /// Not yet run by an engine
    #[default]
    NotProcessed,
    /// Transform done, ICV verified
    Success,
    /// ICV mismatch
    AuthFailed,
    /// Engine could not run the job
    Error,
}

/// Work requested from the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOp {
    /// Combined decrypt + verify
    Aead {
        /// Ciphertext
        data: Region,
        /// Additional authenticated data in the last segment
        aad: TailRef,
    },
    /// Verify HMAC over `auth`, then decrypt `cipher`
    CipherAuth {
        /// Ciphertext
        cipher: Region,
        /// Authenticated bytes
        auth: Region,
    },
    /// Verify HMAC only
    AuthOnly {
        /// Authenticated bytes
        auth: Region,
    },
}

impl JobOp {
    /// Ciphertext region, empty for auth-only jobs
    pub fn cipher_region(&self) -> Region {
        match self {
            JobOp::Aead { data, .. } => *data,
            JobOp::CipherAuth { cipher, .. } => *cipher,
            JobOp::AuthOnly { auth } => Region::new(auth.end(), 0),
        }
    }

    /// Authenticated region, if separate from the ciphertext
    pub fn auth_region(&self) -> Option<Region> {
        match self {
            JobOp::Aead { .. } => None,
            JobOp::CipherAuth { auth, .. } | JobOp::AuthOnly { auth } => Some(*auth),
        }
    }
}

/// Job descriptor for one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CryptoJob {
    /// Requested operation
    pub op: JobOp,
    /// IV / nonce block
    pub iv: IvBlock,
    /// Received ICV in the last segment
    pub digest: TailRef,
    /// Completion status
    pub status: JobStatus,
}

/// Apply engine completion status to the packets
///
/// Every packet is marked as security-processed; those whose job did not
/// succeed also get [`OffloadFlags::SEC_OFFLOAD_FAILED`]. Packets and jobs
/// are matched by position.
pub fn complete(packets: &mut [Packet], jobs: &[CryptoJob]) {
    for (packet, job) in packets.iter_mut().zip(jobs) {
        packet.ol_flags.insert(OffloadFlags::SEC_OFFLOAD);
        if job.status != JobStatus::Success {
            packet.ol_flags.insert(OffloadFlags::SEC_OFFLOAD_FAILED);
        }
    }
}

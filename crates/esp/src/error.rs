//! Error types for inbound ESP processing
//!
//! Every per-packet failure in the pipeline is reported through [`Error`].
//! Failures never abort a batch: the offending packet is moved to the
//! reject list together with its error, and the batch keeps going.
//!
//! [`Error::kind`] maps each error onto the drop taxonomy used by callers
//! for per-SA statistics.

use std::fmt;

/// Result type for ESP data-plane operations
pub type Result<T> = std::result::Result<T, Error>;

/// Drop taxonomy for rejected packets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid length, padding, next header or framing
    Malformed,
    /// Sequence number too old, zero or already seen
    Replay,
    /// Integrity check failed in the crypto engine
    Integrity,
    /// Not enough tail space to stage AAD / ESN material
    Resource,
    /// Security association misconfiguration
    Config,
    /// Aggregate signal: at least one packet of a batch was rejected
    Batch,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Malformed => "malformed",
            ErrorKind::Replay => "replay",
            ErrorKind::Integrity => "integrity",
            ErrorKind::Resource => "resource",
            ErrorKind::Config => "config",
            ErrorKind::Batch => "batch",
        };
        f.write_str(name)
    }
}

/// ESP data-plane errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid security association configuration
    InvalidConfig(String),

    /// Packet is shorter than the framing requires
    BufferTooShort {
        /// Required length
        required: usize,
        /// Available length
        available: usize,
    },

    /// Ciphertext length is not a multiple of the pad alignment
    InvalidPayloadLength {
        /// Ciphertext length
        length: usize,
        /// Required alignment
        align: usize,
    },

    /// Padding bytes do not match the monotonic filler pattern
    InvalidPadding {
        /// Pad length field from the ESP trailer
        pad_len: u8,
    },

    /// Next header in the ESP trailer differs from the SA's inner protocol
    InvalidNextHeader {
        /// Expected protocol number
        expected: u8,
        /// Protocol number found in the trailer
        actual: u8,
    },

    /// Outer L3 header cannot be rewritten for transport mode
    UnsupportedHeader(String),

    /// Not enough tailroom in the last segment
    NoTailroom {
        /// Bytes needed
        required: usize,
        /// Bytes available
        available: usize,
    },

    /// Duplicate sequence number (already accepted)
    ReplayDetected(u64),

    /// Sequence number is zero or behind the replay window
    InvalidSequence(u64),

    /// The crypto engine reported an integrity/authentication failure
    IntegrityCheckFailed,

    /// Cryptographic engine error
    CryptoError(String),

    /// Some packets of a batch were rejected
    BadBatch {
        /// Packets that made it through
        accepted: usize,
        /// Packets submitted
        total: usize,
    },
}

impl Error {
    /// Classify this error into the drop taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidConfig(_) => ErrorKind::Config,
            Error::BufferTooShort { .. }
            | Error::InvalidPayloadLength { .. }
            | Error::InvalidPadding { .. }
            | Error::InvalidNextHeader { .. }
            | Error::UnsupportedHeader(_) => ErrorKind::Malformed,
            Error::NoTailroom { .. } => ErrorKind::Resource,
            Error::ReplayDetected(_) | Error::InvalidSequence(_) => ErrorKind::Replay,
            Error::IntegrityCheckFailed | Error::CryptoError(_) => ErrorKind::Integrity,
            Error::BadBatch { .. } => ErrorKind::Batch,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidConfig(msg) => write!(f, "Invalid SA configuration: {}", msg),
            Error::BufferTooShort {
                required,
                available,
            } => {
                write!(
                    f,
                    "Buffer too short: need {} bytes, have {}",
                    required, available
                )
            }
            Error::InvalidPayloadLength { length, align } => {
                write!(
                    f,
                    "Invalid ESP payload length {} (alignment {})",
                    length, align
                )
            }
            Error::InvalidPadding { pad_len } => {
                write!(f, "Invalid ESP padding (pad length {})", pad_len)
            }
            Error::InvalidNextHeader { expected, actual } => {
                write!(
                    f,
                    "Invalid next header: expected {}, got {}",
                    expected, actual
                )
            }
            Error::UnsupportedHeader(msg) => write!(f, "Unsupported L3 header: {}", msg),
            Error::NoTailroom {
                required,
                available,
            } => {
                write!(
                    f,
                    "No tailroom: need {} bytes, have {}",
                    required, available
                )
            }
            Error::ReplayDetected(seq) => {
                write!(f, "Replay attack detected (sequence: {})", seq)
            }
            Error::InvalidSequence(seq) => write!(f, "Invalid sequence number: {}", seq),
            Error::IntegrityCheckFailed => write!(f, "Integrity check failed"),
            Error::CryptoError(msg) => write!(f, "Cryptographic error: {}", msg),
            Error::BadBatch { accepted, total } => {
                write!(f, "Bad batch: {} of {} packets accepted", accepted, total)
            }
        }
    }
}

impl std::error::Error for Error {}

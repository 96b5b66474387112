//! Inbound IPsec ESP data plane.
//!
//! This crate implements the receive half of ESP (RFC 4303) for batches of
//! packets belonging to one Security Association:
//!
//! - **Prepare** - framing checks, anti-replay check, crypto job layout
//! - **Crypto** - job descriptors, a pluggable [`CryptoEngine`] and a
//!   software engine for AES-GCM, ChaCha20-Poly1305, AES-CBC, AES-CTR and
//!   HMAC-SHA2
//! - **Process** - trailer validation, tunnel/transport decapsulation,
//!   anti-replay commit
//!
//! Key exchange, SA lookup and the outbound direction are out of scope.
//!
//! # Features
//!
//! - `serde` - serialization of [`SaConfig`] and the algorithm types
//!
//! # Example
//!
//! ```rust
//! use esp_dataplane::{Algorithm, AeadCipher, IpVersion, SaConfig, SecurityAssociation};
//!
//! let config = SaConfig::builder()
//!     .with_spi(0x1000)
//!     .with_algorithm(Algorithm::Aead {
//!         cipher: AeadCipher::AesGcm128,
//!         salt: [1, 2, 3, 4],
//!     })
//!     .with_tunnel(IpVersion::V4)
//!     .with_esn(true)
//!     .build()
//!     .unwrap();
//!
//! let sa = SecurityAssociation::new(&config).unwrap();
//! assert_eq!(sa.aad_len(), 12);
//! assert_eq!(sa.icv_len(), 16);
//! ```
//!
//! # Security
//!
//! - All ciphers and MACs come from the RustCrypto crates
//! - ICVs are compared in constant time (`subtle`)
//! - Keys held by [`SoftEngine`] are wiped on drop (`zeroize`)
//! - Packet offsets are bounds-checked; malformed input yields an error
//!
//! # References
//!
//! - [RFC 4303](https://datatracker.ietf.org/doc/html/rfc4303) - IP Encapsulating Security Payload
//! - [RFC 4106](https://datatracker.ietf.org/doc/html/rfc4106) - AES-GCM in ESP
//! - [RFC 3686](https://datatracker.ietf.org/doc/html/rfc3686) - AES-CTR in ESP
//! - [RFC 7634](https://datatracker.ietf.org/doc/html/rfc7634) - ChaCha20-Poly1305 in IKE and ESP

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod config;
pub mod crypto;
mod error;
pub mod inbound;
pub mod iph;
pub mod logging;
pub mod metrics;
pub mod packet;
pub mod replay;
pub mod sa;
pub mod wire;

pub use config::{SaConfig, SaConfigBuilder};
pub use crypto::{complete, CryptoEngine, CryptoJob, JobStatus, SoftEngine};
pub use error::{Error, ErrorKind, Result};
pub use inbound::{
    prepare, process_transport, process_tunnel, InboundSession, PrepareBatch, ProcessBatch,
    Rejected,
};
pub use iph::IpVersion;
pub use metrics::{InboundMetrics, MetricsSnapshot};
pub use packet::{OffloadFlags, Packet, PacketType, Segment};
pub use replay::ReplayWindow;
pub use sa::{
    AeadCipher, Algorithm, AuthAlgorithm, BlockCipher, CtrCipher, Mode, SecurityAssociation,
};

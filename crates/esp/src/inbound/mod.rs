//! Inbound ESP pipeline
//!
//! Processing of one batch of packets for one SA runs in two halves around
//! an external crypto engine:
//!
//! ```text
//!  packets ─▶ prepare ─▶ jobs ─▶ engine ─▶ complete ─▶ process ─▶ clear text
//!              │                                        │
//!              └─ replay check (read guard)             └─ replay commit (write guard)
//! ```
//!
//! Both halves partition their input into survivors, kept in their original
//! relative order, and rejects that carry the original index and the
//! reason. A bad packet never aborts its batch.

mod prepare;
mod process;

use std::sync::Arc;

pub use prepare::prepare;
pub use process::{process_transport, process_tunnel};

use crate::crypto::CryptoJob;
use crate::logging;
use crate::metrics::InboundMetrics;
use crate::packet::Packet;
use crate::sa::{Mode, SecurityAssociation};
use crate::{Error, Result};

/// A packet dropped by one of the pipeline stages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejected {
    /// Position of the packet in the batch handed to the stage
    pub index: usize,
    /// The packet, as far as the stage got with it
    pub packet: Packet,
    /// Reason for the drop
    pub error: Error,
}

fn batch_check(accepted: usize, total: usize) -> Result<()> {
    if accepted == total {
        Ok(())
    } else {
        Err(Error::BadBatch { accepted, total })
    }
}

/// Result of [`prepare`]
#[derive(Debug, Default)]
pub struct PrepareBatch {
    /// Packets ready for the crypto engine
    pub packets: Vec<Packet>,
    /// One job per packet in `packets`
    pub jobs: Vec<CryptoJob>,
    /// Dropped packets, by ascending index
    pub rejected: Vec<Rejected>,
    total: usize,
}

impl PrepareBatch {
    pub(crate) fn with_capacity(total: usize) -> Self {
        PrepareBatch {
            packets: Vec::with_capacity(total),
            jobs: Vec::with_capacity(total),
            rejected: Vec::new(),
            total,
        }
    }

    /// Packets that got a job
    pub fn accepted(&self) -> usize {
        self.packets.len()
    }

    /// Packets submitted
    pub fn total(&self) -> usize {
        self.total
    }

    /// Fail with `BadBatch` if any packet was dropped
    pub fn check(&self) -> Result<()> {
        batch_check(self.accepted(), self.total)
    }
}

/// Result of [`process_tunnel`] and [`process_transport`]
#[derive(Debug, Default)]
pub struct ProcessBatch {
    /// Decapsulated packets
    pub packets: Vec<Packet>,
    /// Dropped packets, by ascending index
    pub rejected: Vec<Rejected>,
    total: usize,
}

impl ProcessBatch {
    /// Packets delivered
    pub fn accepted(&self) -> usize {
        self.packets.len()
    }

    /// Packets submitted
    pub fn total(&self) -> usize {
        self.total
    }

    /// Fail with `BadBatch` if any packet was dropped
    pub fn check(&self) -> Result<()> {
        batch_check(self.accepted(), self.total)
    }
}

/// Inbound processing context of one SA
///
/// Wraps the shared SA with metrics and logging and picks the
/// post-processor matching the SA mode.
///
/// # Example
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use esp_dataplane::{complete, AeadCipher, Algorithm, CryptoEngine, InboundSession};
/// # use esp_dataplane::{IpVersion, Packet, SaConfig, SecurityAssociation, SoftEngine};
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// # let config = SaConfig::builder()
/// #     .with_spi(0x1000)
/// #     .with_algorithm(Algorithm::Aead { cipher: AeadCipher::AesGcm128, salt: [0; 4] })
/// #     .with_tunnel(IpVersion::V4)
/// #     .build()?;
/// # let sa = SecurityAssociation::new(&config)?;
/// # let engine = SoftEngine::new(&sa, &[0u8; 16], &[])?;
/// # let packets: Vec<Packet> = Vec::new();
/// let session = InboundSession::new(Arc::new(sa));
/// let mut prepared = session.prepare(packets);
/// engine.process_batch(&mut prepared.packets, &mut prepared.jobs);
/// complete(&mut prepared.packets, &prepared.jobs);
/// let done = session.process(prepared.packets);
/// println!("{} of {} packets decapsulated", done.accepted(), done.total());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct InboundSession {
    sa: Arc<SecurityAssociation>,
    metrics: InboundMetrics,
}

impl InboundSession {
    /// Create a session with its own metrics
    pub fn new(sa: Arc<SecurityAssociation>) -> Self {
        Self::with_metrics(sa, InboundMetrics::new())
    }

    /// Create a session reporting into shared metrics
    pub fn with_metrics(sa: Arc<SecurityAssociation>, metrics: InboundMetrics) -> Self {
        logging::log_sa_installed(&sa);
        InboundSession { sa, metrics }
    }

    /// Security association of this session
    pub fn sa(&self) -> &Arc<SecurityAssociation> {
        &self.sa
    }

    /// Metrics of this session
    pub fn metrics(&self) -> &InboundMetrics {
        &self.metrics
    }

    /// Validate packets and build their crypto jobs
    pub fn prepare(&self, packets: Vec<Packet>) -> PrepareBatch {
        let batch = prepare(&self.sa, packets);

        self.metrics.record_prepared(batch.accepted());
        self.account_rejects("prepare", &batch.rejected);
        logging::log_batch(self.sa.spi(), "prepare", batch.accepted(), batch.total());
        batch
    }

    /// Post-process packets whose crypto jobs completed
    pub fn process(&self, packets: Vec<Packet>) -> ProcessBatch {
        let (stage, batch) = match self.sa.mode() {
            Mode::Tunnel { .. } => ("tunnel", process_tunnel(&self.sa, packets)),
            Mode::Transport { .. } => ("transport", process_transport(&self.sa, packets)),
        };

        for packet in &batch.packets {
            self.metrics.record_processed(packet.len());
        }
        self.account_rejects(stage, &batch.rejected);
        logging::log_batch(self.sa.spi(), stage, batch.accepted(), batch.total());
        batch
    }

    fn account_rejects(&self, stage: &str, rejected: &[Rejected]) {
        if rejected.is_empty() {
            return;
        }
        self.metrics.record_bad_batch();
        for reject in rejected {
            self.metrics.record_dropped(reject.error.kind());
            logging::log_packet_rejected(self.sa.spi(), stage, reject.index, &reject.error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_check() {
        assert!(batch_check(4, 4).is_ok());
        assert_eq!(
            batch_check(6, 8),
            Err(Error::BadBatch {
                accepted: 6,
                total: 8
            })
        );
    }

    #[test]
    fn test_empty_batches() {
        let batch = PrepareBatch::with_capacity(0);
        assert_eq!(batch.accepted(), 0);
        assert!(batch.check().is_ok());
        assert!(ProcessBatch::default().check().is_ok());
    }
}

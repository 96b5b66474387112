//! Metrics for inbound ESP processing
//!
//! Counters for monitoring the throughput and drop profile of one or more
//! inbound SAs. All metrics use atomic operations for thread-safe updates.
//!
//! # Example
//!
//! ```
//! use esp_dataplane::metrics::InboundMetrics;
//! use esp_dataplane::ErrorKind;
//!
//! let metrics = InboundMetrics::new();
//!
//! metrics.record_prepared(32);
//! metrics.record_processed(1400);
//! metrics.record_dropped(ErrorKind::Replay);
//!
//! let snapshot = metrics.snapshot();
//! println!("Replays: {}", snapshot.dropped_replay);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::ErrorKind;

/// Inbound ESP metrics for monitoring
///
/// Clones share the same counters.
#[derive(Debug, Clone)]
pub struct InboundMetrics {
    /// Packets that left prepare with a crypto job
    pub packets_prepared: Arc<AtomicU64>,

    /// Packets that completed post-processing and replay commit
    pub packets_processed: Arc<AtomicU64>,

    /// Clear-text bytes delivered
    pub bytes_processed: Arc<AtomicU64>,

    /// Drops for bad framing, padding, next header or length
    pub dropped_malformed: Arc<AtomicU64>,

    /// Drops for replayed or out-of-window sequence numbers
    pub dropped_replay: Arc<AtomicU64>,

    /// Drops for failed integrity checks
    pub dropped_integrity: Arc<AtomicU64>,

    /// Drops for missing tailroom
    pub dropped_resource: Arc<AtomicU64>,

    /// Batches with at least one reject
    pub bad_batches: Arc<AtomicU64>,
}

impl InboundMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self {
            packets_prepared: Arc::new(AtomicU64::new(0)),
            packets_processed: Arc::new(AtomicU64::new(0)),
            bytes_processed: Arc::new(AtomicU64::new(0)),
            dropped_malformed: Arc::new(AtomicU64::new(0)),
            dropped_replay: Arc::new(AtomicU64::new(0)),
            dropped_integrity: Arc::new(AtomicU64::new(0)),
            dropped_resource: Arc::new(AtomicU64::new(0)),
            bad_batches: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record packets that got a crypto job
    pub fn record_prepared(&self, count: usize) {
        self.packets_prepared
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Record one delivered packet
    ///
    /// # Arguments
    ///
    /// * `bytes` - Packet length after decapsulation
    pub fn record_processed(&self, bytes: usize) {
        self.packets_processed.fetch_add(1, Ordering::Relaxed);
        self.bytes_processed
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record one dropped packet
    pub fn record_dropped(&self, kind: ErrorKind) {
        let counter = match kind {
            ErrorKind::Malformed | ErrorKind::Config | ErrorKind::Batch => &self.dropped_malformed,
            ErrorKind::Replay => &self.dropped_replay,
            ErrorKind::Integrity => &self.dropped_integrity,
            ErrorKind::Resource => &self.dropped_resource,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a batch that had rejects
    pub fn record_bad_batch(&self) {
        self.bad_batches.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    ///
    /// Values may be slightly inconsistent across metrics due to concurrent updates.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            packets_prepared: self.packets_prepared.load(Ordering::Relaxed),
            packets_processed: self.packets_processed.load(Ordering::Relaxed),
            bytes_processed: self.bytes_processed.load(Ordering::Relaxed),
            dropped_malformed: self.dropped_malformed.load(Ordering::Relaxed),
            dropped_replay: self.dropped_replay.load(Ordering::Relaxed),
            dropped_integrity: self.dropped_integrity.load(Ordering::Relaxed),
            dropped_resource: self.dropped_resource.load(Ordering::Relaxed),
            bad_batches: self.bad_batches.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics to zero
    pub fn reset(&self) {
        self.packets_prepared.store(0, Ordering::Relaxed);
        self.packets_processed.store(0, Ordering::Relaxed);
        self.bytes_processed.store(0, Ordering::Relaxed);
        self.dropped_malformed.store(0, Ordering::Relaxed);
        self.dropped_replay.store(0, Ordering::Relaxed);
        self.dropped_integrity.store(0, Ordering::Relaxed);
        self.dropped_resource.store(0, Ordering::Relaxed);
        self.bad_batches.store(0, Ordering::Relaxed);
    }
}

impl Default for InboundMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time snapshot of the inbound metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    /// Packets that left prepare with a crypto job
    pub packets_prepared: u64,

    /// Packets delivered
    pub packets_processed: u64,

    /// Clear-text bytes delivered
    pub bytes_processed: u64,

    /// Malformed drops
    pub dropped_malformed: u64,

    /// Replay drops
    pub dropped_replay: u64,

    /// Integrity drops
    pub dropped_integrity: u64,

    /// Resource drops
    pub dropped_resource: u64,

    /// Batches with rejects
    pub bad_batches: u64,
}

impl MetricsSnapshot {
    /// Total dropped packets
    pub fn dropped_total(&self) -> u64 {
        self.dropped_malformed + self.dropped_replay + self.dropped_integrity + self.dropped_resource
    }

    /// Share of packets delivered out of delivered + dropped (0.0 to 1.0)
    pub fn accept_rate(&self) -> f64 {
        let seen = self.packets_processed + self.dropped_total();
        if seen == 0 {
            return 1.0;
        }
        self.packets_processed as f64 / seen as f64
    }

    /// Share of packets dropped (0.0 to 1.0)
    pub fn drop_rate(&self) -> f64 {
        let seen = self.packets_processed + self.dropped_total();
        if seen == 0 {
            return 0.0;
        }
        self.dropped_total() as f64 / seen as f64
    }

    /// Average delivered packet size in bytes
    pub fn avg_packet_size(&self) -> f64 {
        if self.packets_processed == 0 {
            return 0.0;
        }
        self.bytes_processed as f64 / self.packets_processed as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = InboundMetrics::new();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot, MetricsSnapshot::default());
        assert_eq!(snapshot.accept_rate(), 1.0);
        assert_eq!(snapshot.drop_rate(), 0.0);
    }

    #[test]
    fn test_drop_taxonomy() {
        let metrics = InboundMetrics::new();
        metrics.record_dropped(ErrorKind::Malformed);
        metrics.record_dropped(ErrorKind::Replay);
        metrics.record_dropped(ErrorKind::Replay);
        metrics.record_dropped(ErrorKind::Integrity);
        metrics.record_dropped(ErrorKind::Resource);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.dropped_malformed, 1);
        assert_eq!(snapshot.dropped_replay, 2);
        assert_eq!(snapshot.dropped_integrity, 1);
        assert_eq!(snapshot.dropped_resource, 1);
        assert_eq!(snapshot.dropped_total(), 5);
    }

    #[test]
    fn test_rates() {
        let metrics = InboundMetrics::new();
        metrics.record_processed(1000);
        metrics.record_processed(500);
        metrics.record_processed(1500);
        metrics.record_dropped(ErrorKind::Replay);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.accept_rate(), 0.75);
        assert_eq!(snapshot.drop_rate(), 0.25);
        assert_eq!(snapshot.avg_packet_size(), 1000.0);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = InboundMetrics::new();
        let clone = metrics.clone();
        clone.record_prepared(8);
        clone.record_bad_batch();
        assert_eq!(metrics.snapshot().packets_prepared, 8);
        assert_eq!(metrics.snapshot().bad_batches, 1);
    }

    #[test]
    fn test_reset() {
        let metrics = InboundMetrics::new();
        metrics.record_prepared(4);
        metrics.record_processed(100);
        metrics.record_dropped(ErrorKind::Integrity);
        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }
}

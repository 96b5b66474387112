//! Anti-Replay Protection for inbound ESP
//!
//! Implements RFC 4303 Section 3.4.3 (anti-replay) and Appendix A2
//! (extended sequence number reconstruction).
//!
//! # Overview
//!
//! Each inbound SA keeps the highest accepted sequence number (`last_seen`)
//! plus a bitmap of recently accepted numbers. The bitmap is a ring of 64-bit
//! buckets indexed by `seq >> 6`; bit `seq & 63` inside a bucket marks the
//! sequence number as seen.
//!
//! ```text
//!            bucket_index_mask = nb_buckets - 1
//!
//!   seq:   | ... bucket (seq >> 6) & mask ... | bit (seq & 63) |
//!
//!   ring:  [ b0 ][ b1 ][ b2 ][ b3 ]
//!                  ^ last_seen >> 6
//!   advancing last_seen clears the buckets it moves into
//! ```
//!
//! Validation ([`ReplayWindow::check`]) never mutates and can run under a
//! shared read guard; commits ([`ReplayWindow::update`]) need the write
//! guard handed out by [`ReplayTracker::update_start`].
//!
//! # References
//!
//! - [RFC 4303 Section 3.4.3](https://datatracker.ietf.org/doc/html/rfc4303#section-3.4.3)
//! - [RFC 4303 Appendix A2](https://datatracker.ietf.org/doc/html/rfc4303#appendix-A.2)

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{Error, Result};

/// Default anti-replay window size (64 packets)
///
/// RFC 4303 recommends a minimum window size of 32.
/// Common implementations use 64 for better protection.
pub const DEFAULT_WINDOW_SIZE: u32 = 64;

/// Minimum allowed window size (when enabled)
pub const MIN_WINDOW_SIZE: u32 = 32;

/// Maximum window size
pub const MAX_WINDOW_SIZE: u32 = 4096;

const BUCKET_BITS: u32 = 6;
const BUCKET_SIZE: u64 = 1 << BUCKET_BITS;
const BIT_LOC_MASK: u64 = BUCKET_SIZE - 1;

/// Reconstruct a 64-bit extended sequence number from its low 32 bits
///
/// RFC 4303 Appendix A2: if the window sits in one 2^32 epoch, a wire value
/// below the window bottom belongs to the next epoch. If the window straddles
/// an epoch boundary, a wire value at or above the window bottom belongs to
/// the previous epoch.
///
/// # Arguments
///
/// * `last_seen` - Highest accepted 64-bit sequence number
/// * `wire` - Low 32 bits received in the ESP header
/// * `window_size` - Replay window size (0 is treated as 1)
pub fn reconstruct_esn(last_seen: u64, wire: u32, window_size: u32) -> u64 {
    let w = window_size.max(1);
    let tl = last_seen as u32;
    let mut th = (last_seen >> 32) as u32;
    let bl = tl.wrapping_sub(w).wrapping_add(1);

    if tl >= w - 1 {
        th = th.wrapping_add(u32::from(wire < bl));
    } else if th != 0 {
        th -= u32::from(wire >= bl);
    }

    (u64::from(th) << 32) | u64::from(wire)
}

/// Number of 64-bit buckets backing a window of `window_size` packets
///
/// One spare bucket keeps the oldest in-window bucket and the newest one in
/// different ring slots.
pub fn bucket_count(window_size: u32) -> usize {
    let needed = (u64::from(window_size) + BUCKET_SIZE - 1) / BUCKET_SIZE + 1;
    (needed as usize).next_power_of_two().max(2)
}

/// Anti-Replay Window
///
/// Tracks accepted sequence numbers of one inbound SA.
///
/// # Example
///
/// ```rust
/// use esp_dataplane::replay::ReplayWindow;
///
/// let mut window = ReplayWindow::new(64).unwrap();
///
/// // Accept new packet
/// assert!(window.check_and_update(1).is_ok());
///
/// // Reject duplicate
/// assert!(window.check_and_update(1).is_err());
///
/// // Accept newer packet
/// assert!(window.check_and_update(2).is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayWindow {
    /// Highest sequence number accepted so far
    last_seen: u64,

    /// Ring of 64-bit buckets
    buckets: Vec<u64>,

    /// Window size in packets, 0 when disabled
    window_size: u32,
}

impl Default for ReplayWindow {
    fn default() -> Self {
        ReplayWindow {
            last_seen: 0,
            buckets: vec![0; bucket_count(DEFAULT_WINDOW_SIZE)],
            window_size: DEFAULT_WINDOW_SIZE,
        }
    }
}

impl ReplayWindow {
    /// Create new anti-replay window
    ///
    /// # Arguments
    ///
    /// * `window_size` - Number of packets to track (32-4096), or 0 to
    ///   disable replay protection
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` if window_size is outside the valid range
    pub fn new(window_size: u32) -> Result<Self> {
        if window_size == 0 {
            return Ok(Self::disabled());
        }
        if !(MIN_WINDOW_SIZE..=MAX_WINDOW_SIZE).contains(&window_size) {
            return Err(Error::InvalidConfig(format!(
                "Window size must be 0 or between {} and {}, got {}",
                MIN_WINDOW_SIZE, MAX_WINDOW_SIZE, window_size
            )));
        }

        Ok(ReplayWindow {
            last_seen: 0,
            buckets: vec![0; bucket_count(window_size)],
            window_size,
        })
    }

    /// Window that accepts every sequence number
    pub fn disabled() -> Self {
        ReplayWindow {
            last_seen: 0,
            buckets: Vec::new(),
            window_size: 0,
        }
    }

    /// Check if replay protection is on
    pub fn is_enabled(&self) -> bool {
        self.window_size != 0
    }

    /// Highest sequence number accepted
    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }

    /// Window size in packets
    pub fn window_size(&self) -> u32 {
        self.window_size
    }

    /// Number of buckets in the ring
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    fn index_mask(&self) -> u64 {
        self.buckets.len() as u64 - 1
    }

    fn slot(&self, seq: u64) -> (usize, u64) {
        let bucket = ((seq >> BUCKET_BITS) & self.index_mask()) as usize;
        (bucket, 1u64 << (seq & BIT_LOC_MASK))
    }

    fn check_bounds(&self, seq: u64) -> Result<()> {
        if seq == 0 {
            return Err(Error::InvalidSequence(seq));
        }
        if seq.saturating_add(u64::from(self.window_size)) < self.last_seen {
            return Err(Error::InvalidSequence(seq));
        }
        Ok(())
    }

    /// Validate a sequence number without touching the window
    ///
    /// # Errors
    ///
    /// - `InvalidSequence` for seq 0 or a number behind the window
    /// - `ReplayDetected` for a number already accepted
    pub fn check(&self, seq: u64) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        self.check_bounds(seq)?;
        if seq > self.last_seen {
            return Ok(());
        }

        let (bucket, bit) = self.slot(seq);
        if self.buckets[bucket] & bit != 0 {
            return Err(Error::ReplayDetected(seq));
        }
        Ok(())
    }

    /// Commit a sequence number, sliding the window forward if needed
    ///
    /// # Errors
    ///
    /// Same as [`ReplayWindow::check`]; on error the window is unchanged.
    pub fn update(&mut self, seq: u64) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        self.check_bounds(seq)?;

        if seq > self.last_seen {
            let nb = self.buckets.len() as u64;
            let last_bucket = self.last_seen >> BUCKET_BITS;
            let diff = ((seq >> BUCKET_BITS) - last_bucket).min(nb);
            let mask = self.index_mask();
            for i in 0..diff {
                self.buckets[((last_bucket + i + 1) & mask) as usize] = 0;
            }
            self.last_seen = seq;
        }

        let (bucket, bit) = self.slot(seq);
        if self.buckets[bucket] & bit != 0 {
            return Err(Error::ReplayDetected(seq));
        }
        self.buckets[bucket] |= bit;
        Ok(())
    }

    /// Check sequence number and update window if valid
    pub fn check_and_update(&mut self, seq: u64) -> Result<()> {
        self.check(seq)?;
        self.update(seq)
    }

    /// Reset window to initial state
    pub fn reset(&mut self) {
        self.last_seen = 0;
        self.buckets.iter_mut().for_each(|b| *b = 0);
    }
}

/// Shared guard used while validating sequence numbers
pub type ReplayReadGuard<'a> = RwLockReadGuard<'a, ReplayWindow>;

/// Exclusive guard used while committing sequence numbers
pub type ReplayWriteGuard<'a> = RwLockWriteGuard<'a, ReplayWindow>;

/// Replay window shared between concurrent batches of one SA
///
/// Any number of prepare batches can validate at once; commits are
/// serialised. Guards release on drop.
#[derive(Debug)]
pub struct ReplayTracker {
    window: RwLock<ReplayWindow>,
}

impl ReplayTracker {
    /// Create a tracker around a window
    pub fn new(window: ReplayWindow) -> Self {
        ReplayTracker {
            window: RwLock::new(window),
        }
    }

    /// Acquire the window for validation
    pub fn acquire(&self) -> ReplayReadGuard<'_> {
        self.window.read()
    }

    /// Acquire the window for committing
    pub fn update_start(&self) -> ReplayWriteGuard<'_> {
        self.window.write()
    }

    /// Copy of the current window state
    pub fn snapshot(&self) -> ReplayWindow {
        self.window.read().clone()
    }
}

//! Structured logging for inbound ESP processing
//!
//! Provides structured, contextual logging using the `tracing` framework.
//! Every event carries the SPI of the SA it belongs to.
//!
//! # Log Levels
//!
//! - **DEBUG**: batch summaries, malformed or resource-starved packets
//! - **INFO**: SA installation
//! - **WARN**: replayed packets, integrity failures
//!
//! # Example
//!
//! ```no_run
//! tracing_subscriber::fmt()
//!     .with_env_filter("esp_dataplane=debug")
//!     .init();
//! ```

use tracing::{debug, info, warn};

use crate::sa::SecurityAssociation;
use crate::{Error, ErrorKind};

/// Log SA installation
///
/// # Arguments
///
/// * `sa` - The freshly built security association
pub fn log_sa_installed(sa: &SecurityAssociation) {
    info!(
        spi = sa.spi(),
        algorithm = %sa.algorithm(),
        mode = %sa.mode(),
        esn = sa.esn(),
        icv_len = sa.icv_len(),
        replay_window = sa.replay_window_size(),
        "Inbound SA installed"
    );
}

/// Log a rejected packet
///
/// # Arguments
///
/// * `spi` - SPI of the SA
/// * `stage` - "prepare" or "process"
/// * `index` - Position of the packet in the submitted batch
/// * `error` - Reason for the reject
pub fn log_packet_rejected(spi: u32, stage: &str, index: usize, error: &Error) {
    match error.kind() {
        ErrorKind::Replay | ErrorKind::Integrity => warn!(
            spi = spi,
            stage = stage,
            index = index,
            kind = %error.kind(),
            error = %error,
            "ESP packet dropped"
        ),
        _ => debug!(
            spi = spi,
            stage = stage,
            index = index,
            kind = %error.kind(),
            error = %error,
            "ESP packet dropped"
        ),
    }
}

/// Log a batch summary
///
/// # Arguments
///
/// * `spi` - SPI of the SA
/// * `stage` - "prepare", "tunnel" or "transport"
/// * `accepted` - Packets that made it through
/// * `total` - Packets submitted
pub fn log_batch(spi: u32, stage: &str, accepted: usize, total: usize) {
    debug!(
        spi = spi,
        stage = stage,
        accepted = accepted,
        rejected = total - accepted,
        "ESP batch done"
    );
}

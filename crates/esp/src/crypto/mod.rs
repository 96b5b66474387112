//! Crypto job descriptors and engines
//!
//! The inbound pipeline never runs ciphers itself. Prepare emits one
//! [`CryptoJob`] per packet; an engine runs the jobs and [`complete`] folds
//! their status back into the packet offload flags, where post-processing
//! picks it up.

mod engine;
mod job;

pub use engine::{CryptoEngine, SoftEngine};
pub use job::{complete, CryptoJob, IvBlock, JobOp, JobStatus, Region, TailRef};

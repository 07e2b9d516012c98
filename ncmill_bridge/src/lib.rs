//! Status replication bridge: the non-real-time side of the status
//! path. A fixed-cadence replicator copies snapshots out of the motion
//! double buffer and hands them to sinks; nothing here is event-driven
//! and nothing here can stall the executor.
//!
//! # Module Structure
//!
//! - [`report`] - The serialized status message
//! - [`replicator`] - Fixed-cadence snapshot replication loop
//! - [`watcher`] - Poll/compare completion tracking
//! - [`tcp`] - Newline-delimited JSON publishing over TCP

pub mod replicator;
pub mod report;
pub mod tcp;
pub mod watcher;

pub use replicator::{StatusReplicator, StatusSink};
pub use report::StatusReport;
pub use tcp::TcpPublisher;
pub use watcher::CompletionWatcher;

use thiserror::Error;

/// Bridge-side failure: serialization or socket I/O.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("status serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

pub type BridgeResult<T> = Result<T, BridgeError>;

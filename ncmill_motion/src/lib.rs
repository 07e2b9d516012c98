//! Motion side of the NCMILL stack: the bounded command queue across
//! the real-time boundary, the paced trajectory executor and the
//! double-buffered status publication.
//!
//! ```text
//! CommandProducer ─(lock-free ring)→ CommandConsumer
//!                                        │
//!                                 TrajectoryExecutor (cycle loop)
//!                                        │
//!                                  StatusWriter ─→ StatusReader(s)
//! ```
//!
//! # Module Structure
//!
//! - [`queue`] - Bounded SPSC command queue with entry lifecycle
//! - [`executor`] - Paced cycle loop, RT setup, cycle statistics
//! - [`status_buffer`] - Double-buffered machine status snapshots

pub mod executor;
pub mod queue;
pub mod status_buffer;

pub use executor::{rt_setup, CycleStats, ExecError, ExecutorConfig, TrajectoryExecutor};
pub use queue::{channel, CommandConsumer, CommandProducer, Enqueue, EntryState};
pub use status_buffer::{status_buffer, StatusReader, StatusWriter};

//! Common re-exports for convenience.
//!
//! ```rust
//! use ncmill_common::prelude::*;
//! ```

pub use crate::config::{ConfigLoader, NcConfig, SharedConfig};
pub use crate::consts::*;
pub use crate::error::{InterpError, InterpErrorKind, NcError, NcResult, SyntaxError};
pub use crate::status::{
    ActiveAlarm, AlarmKind, ExecutorState, JointFlags, JointStatus, MachineStatus,
    SpindleDirection, SpindleStatus,
};
pub use crate::types::{Axis, Position, SeqNo};

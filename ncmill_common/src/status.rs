//! Machine/joint/spindle status snapshot records.
//!
//! These records cross the real-time boundary: the trajectory executor
//! refreshes a `MachineStatus` every cycle and publishes it through a
//! double buffer, so every field must be `Copy` with a fixed `repr(C)`
//! layout. Readers only ever see a complete snapshot, never a partial
//! update.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

use crate::consts::MAX_JOINTS;
use crate::types::{Position, SeqNo};

// ─── Joint Status ───────────────────────────────────────────────────

bitflags! {
    /// Per-joint condition flags.
    ///
    /// FAULT and FOLLOWING_ERROR halt dispatch when raised by the
    /// trajectory executor.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct JointFlags: u8 {
        /// Joint has been homed.
        const HOMED           = 0x01;
        /// Joint is currently moving.
        const MOVING          = 0x02;
        /// Joint is on a hardware limit.
        const ON_LIMIT        = 0x04;
        /// Following error exceeded.
        const FOLLOWING_ERROR = 0x08;
        /// Drive fault reported.
        const FAULT           = 0x10;
    }
}

/// Snapshot of one joint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[repr(C)]
pub struct JointStatus {
    /// Actual position [user units].
    pub position: f64,
    /// Actual velocity [user units/s].
    pub velocity: f64,
    /// Condition flags.
    pub flags: JointFlags,
}

// ─── Spindle Status ─────────────────────────────────────────────────

/// Spindle rotation direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SpindleDirection {
    #[default]
    Stopped = 0,
    Clockwise = 1,
    CounterClockwise = 2,
}

/// Snapshot of the spindle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[repr(C)]
pub struct SpindleStatus {
    /// Commanded speed [rev/min].
    pub speed: f64,
    /// Rotation direction.
    pub direction: SpindleDirection,
}

// ─── Executor State ─────────────────────────────────────────────────

/// Lifecycle state of the trajectory executor, as seen in status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ExecutorState {
    /// Not yet started or reset.
    #[default]
    Idle = 0,
    /// Executing or waiting for commands.
    Running = 1,
    /// Halted on an execution fault; no further dispatch.
    Faulted = 2,
    /// Aborted; queue drained.
    Aborted = 3,
}

// ─── Alarm ──────────────────────────────────────────────────────────

/// Active alarm category published in status. `None` = no alarm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum AlarmKind {
    #[default]
    None = 0,
    /// `Busy` persisted past the stall threshold.
    Stall = 1,
    /// Execution fault against a specific sequence number.
    ExecutionFault = 2,
}

/// Alarm record carried in the machine status snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[repr(C)]
pub struct ActiveAlarm {
    /// Alarm category.
    pub kind: AlarmKind,
    /// Implicated sequence number (NONE when pre-emission).
    pub seq: SeqNo,
    /// Implicated joint index, or `u8::MAX` when not joint-specific.
    pub joint: u8,
}

// ─── Machine Status ─────────────────────────────────────────────────

/// Full machine status snapshot.
///
/// Refreshed at a fixed cadence by the trajectory executor, read-only to
/// everything else. The whole record is copied through the double buffer
/// in one go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[repr(C)]
pub struct MachineStatus {
    /// Per-joint snapshots.
    pub joints: [JointStatus; MAX_JOINTS],
    /// Spindle snapshot.
    pub spindle: SpindleStatus,
    /// Commanded end point of the command currently executing.
    pub commanded: Position,
    /// Highest completed sequence number.
    pub completed_seq: SeqNo,
    /// Sequence number currently executing (NONE when idle).
    pub executing_seq: SeqNo,
    /// Executor lifecycle state.
    pub executor_state: ExecutorState,
    /// Active alarm, if any.
    pub alarm: ActiveAlarm,
    /// Executor cycle count at snapshot time.
    pub cycle_count: u64,
}

impl MachineStatus {
    /// True if an alarm is active.
    #[inline]
    pub fn has_alarm(&self) -> bool {
        self.alarm.kind != AlarmKind::None
    }

    /// True if the executor refuses further dispatch.
    #[inline]
    pub fn is_halted(&self) -> bool {
        matches!(
            self.executor_state,
            ExecutorState::Faulted | ExecutorState::Aborted
        )
    }
}

// MachineStatus crosses the RT boundary by memcpy; keep it POD-sized.
const_assert!(core::mem::size_of::<MachineStatus>() < 512);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_status_is_quiet() {
        let s = MachineStatus::default();
        assert!(!s.has_alarm());
        assert!(!s.is_halted());
        assert_eq!(s.completed_seq, SeqNo::NONE);
        assert_eq!(s.executor_state, ExecutorState::Idle);
    }

    #[test]
    fn alarm_detection() {
        let mut s = MachineStatus::default();
        s.alarm = ActiveAlarm {
            kind: AlarmKind::ExecutionFault,
            seq: SeqNo(7),
            joint: 2,
        };
        s.executor_state = ExecutorState::Faulted;
        assert!(s.has_alarm());
        assert!(s.is_halted());
    }

    #[test]
    fn joint_flags_composition() {
        let f = JointFlags::HOMED | JointFlags::MOVING;
        assert!(f.contains(JointFlags::HOMED));
        assert!(!f.contains(JointFlags::FAULT));
    }

    #[test]
    fn status_serde_roundtrip() {
        let mut s = MachineStatus::default();
        s.completed_seq = SeqNo(42);
        s.joints[0].position = 1.25;
        s.joints[0].flags = JointFlags::HOMED;
        s.spindle.direction = SpindleDirection::Clockwise;

        let json = serde_json::to_string(&s).unwrap();
        let back: MachineStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}

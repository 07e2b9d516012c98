//! The replicated status message.

use serde::{Deserialize, Serialize};

use ncmill_common::consts::MAX_JOINTS;
use ncmill_common::status::{ActiveAlarm, ExecutorState, JointStatus, MachineStatus, SpindleStatus};
use ncmill_common::types::{Position, SeqNo};

/// One replicated snapshot, as shipped to subscribers.
///
/// Field-for-field copy of [`MachineStatus`] plus the publish epoch the
/// snapshot was taken at. Round-trips losslessly through JSON; the wire
/// framing is one report per line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Status buffer epoch this snapshot was copied at.
    pub epoch: u64,
    /// Highest acknowledged sequence number.
    pub completed_seq: SeqNo,
    /// Sequence number currently being acted on.
    pub executing_seq: SeqNo,
    pub executor_state: ExecutorState,
    pub alarm: ActiveAlarm,
    pub joints: [JointStatus; MAX_JOINTS],
    pub spindle: SpindleStatus,
    /// Target of the active motion command.
    pub commanded: Position,
    pub cycle_count: u64,
}

impl StatusReport {
    pub fn from_status(epoch: u64, status: &MachineStatus) -> Self {
        Self {
            epoch,
            completed_seq: status.completed_seq,
            executing_seq: status.executing_seq,
            executor_state: status.executor_state,
            alarm: status.alarm,
            joints: status.joints,
            spindle: status.spindle,
            commanded: status.commanded,
            cycle_count: status.cycle_count,
        }
    }

    /// True when any alarm is latched.
    pub fn has_alarm(&self) -> bool {
        self.alarm.kind != ncmill_common::status::AlarmKind::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ncmill_common::status::{AlarmKind, SpindleDirection};

    #[test]
    fn json_round_trip_is_lossless() {
        let mut status = MachineStatus::default();
        status.completed_seq = SeqNo(41);
        status.executing_seq = SeqNo(42);
        status.executor_state = ExecutorState::Running;
        status.joints[0].position = 12.5;
        status.joints[2].velocity = -3.25;
        status.spindle = SpindleStatus {
            speed: 1200.0,
            direction: SpindleDirection::Clockwise,
        };
        status.alarm = ActiveAlarm {
            kind: AlarmKind::ExecutionFault,
            seq: SeqNo(42),
            joint: 2,
        };
        status.cycle_count = 100_000;

        let report = StatusReport::from_status(7, &status);
        let line = serde_json::to_string(&report).unwrap();
        assert!(!line.contains('\n'));
        let back: StatusReport = serde_json::from_str(&line).unwrap();
        assert_eq!(back, report);
        assert!(back.has_alarm());
    }
}

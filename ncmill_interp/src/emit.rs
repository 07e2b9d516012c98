//! Canonical command types and the sequence-stamping emitter.
//!
//! A canonical command is fully self-describing: the geometry and
//! auxiliary parameters needed to execute it plus the frozen modal
//! snapshot taken at emission. Sequence numbers are stamped `prev + 1`
//! with no gaps, so a downstream consumer can detect dropped commands
//! by gap detection alone.

use serde::{Deserialize, Serialize};

use ncmill_common::status::SpindleDirection;
use ncmill_common::types::{Position, SeqNo};

use crate::modal::{ModalSnapshot, ModalState, Plane};

// ─── Canonical Operations ───────────────────────────────────────────

/// Arc direction, viewed along the positive plane normal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArcTurn {
    Clockwise,
    CounterClockwise,
}

/// The operation a canonical command performs.
///
/// All variants are `Copy`: commands cross the real-time boundary by
/// value, with no heap payload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CanonOp {
    /// Rapid motion to `target` [machine coordinates].
    StraightTraverse { target: Position },
    /// Feed motion to `target` at the snapshot's feed rate.
    StraightFeed { target: Position },
    /// Arc feed in the snapshot's plane. `center_first`/`center_second`
    /// are the absolute center coordinates along the plane's first and
    /// second axes.
    ArcFeed {
        target: Position,
        center_first: f64,
        center_second: f64,
        turn: ArcTurn,
    },
    /// Pause motion for `seconds`.
    Dwell { seconds: f64 },
    /// Start the spindle.
    SpindleOn {
        speed: f64,
        direction: SpindleDirection,
    },
    /// Stop the spindle.
    SpindleOff,
    /// Change to tool `tool`.
    ToolChange { tool: u32 },
    /// Drive a digital output.
    SetDigitalOut { index: u8, on: bool },
    /// Coolant state change.
    Coolant { mist: bool, flood: bool },
    /// M0 unconditional program stop.
    ProgramStop,
    /// M1 optional stop.
    OptionalStop,
    /// M2/M30 program end.
    ProgramEnd,
}

impl CanonOp {
    /// True for the motion operations the executor moves joints for.
    pub const fn is_motion(&self) -> bool {
        matches!(
            self,
            CanonOp::StraightTraverse { .. }
                | CanonOp::StraightFeed { .. }
                | CanonOp::ArcFeed { .. }
        )
    }
}

/// A fully-resolved, immutable command, stamped with its sequence
/// number and frozen modal context.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CanonicalCommand {
    /// Strictly increasing, gap-free within a program run.
    pub seq: SeqNo,
    /// Source line the command came from, for diagnostics.
    pub line: u32,
    /// Modal context at emission.
    pub modal: ModalSnapshot,
    /// The operation.
    pub op: CanonOp,
}

/// The two in-plane axes used for arc center coordinates.
pub fn plane_axes(plane: Plane) -> (usize, usize) {
    match plane {
        Plane::Xy => (0, 1),
        Plane::Zx => (2, 0),
        Plane::Yz => (1, 2),
    }
}

// ─── Emitter ────────────────────────────────────────────────────────

/// Stamps canonical commands with gap-free sequence numbers.
#[derive(Debug, Default)]
pub struct Emitter {
    last: SeqNo,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last sequence number handed out (NONE before the first emit).
    #[inline]
    pub fn last_seq(&self) -> SeqNo {
        self.last
    }

    /// Build the next command: `previous + 1`, frozen modal snapshot.
    pub fn emit(&mut self, line: u32, modal: &ModalState, op: CanonOp) -> CanonicalCommand {
        self.last = self.last.next();
        CanonicalCommand {
            seq: self.last,
            line,
            modal: modal.snapshot(),
            op,
        }
    }

    /// Forget all numbering (program reset).
    pub fn reset(&mut self) {
        self.last = SeqNo::NONE;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modal::MotionMode;

    #[test]
    fn sequence_numbers_are_gap_free() {
        let mut e = Emitter::new();
        let modal = ModalState::new();
        assert_eq!(e.last_seq(), SeqNo::NONE);

        let a = e.emit(1, &modal, CanonOp::ProgramStop);
        let b = e.emit(2, &modal, CanonOp::ProgramEnd);
        assert_eq!(a.seq, SeqNo(1));
        assert_eq!(b.seq, SeqNo(2));
        assert_eq!(e.last_seq(), SeqNo(2));

        e.reset();
        assert_eq!(e.last_seq(), SeqNo::NONE);
    }

    #[test]
    fn emitted_command_freezes_modal_context() {
        let mut e = Emitter::new();
        let mut modal = ModalState::new();
        modal.motion = MotionMode::Linear;
        modal.feed_rate = 100.0;

        let cmd = e.emit(
            5,
            &modal,
            CanonOp::StraightFeed {
                target: Position::ZERO,
            },
        );

        // Later modal changes must not affect the emitted command.
        modal.feed_rate = 999.0;
        assert_eq!(cmd.modal.feed_rate, 100.0);
        assert_eq!(cmd.line, 5);
    }

    #[test]
    fn plane_axis_mapping() {
        assert_eq!(plane_axes(Plane::Xy), (0, 1));
        assert_eq!(plane_axes(Plane::Zx), (2, 0));
        assert_eq!(plane_axes(Plane::Yz), (1, 2));
    }

    #[test]
    fn motion_classification() {
        assert!(CanonOp::StraightTraverse {
            target: Position::ZERO
        }
        .is_motion());
        assert!(!CanonOp::Dwell { seconds: 1.0 }.is_motion());
    }
}

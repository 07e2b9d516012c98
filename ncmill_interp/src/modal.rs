//! Modal state: interpreter context persisting across blocks.
//!
//! Exactly one live `ModalState` exists per running program; only the
//! interpreter mutates it, and subroutine calls save/restore it through
//! an explicit stack — never by aliasing. `ModalSnapshot` is the frozen
//! `Copy` image embedded in every canonical command: the modal state at
//! the moment of emission fully determines that command's execution
//! semantics, independent of anything mutated later.

use serde::{Deserialize, Serialize};

use ncmill_common::consts::COORD_SYSTEM_COUNT;
use ncmill_common::status::SpindleDirection;
use ncmill_common::types::Position;

// ─── Modal Enums ────────────────────────────────────────────────────

/// Motion modal group (group 1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotionMode {
    /// No motion mode active (G80 state).
    #[default]
    None,
    /// G0 rapid traverse.
    Rapid,
    /// G1 linear feed.
    Linear,
    /// G2 clockwise arc.
    ArcCw,
    /// G3 counter-clockwise arc.
    ArcCcw,
    /// G81 drill cycle.
    Drill,
    /// G82 drill cycle with dwell.
    DrillDwell,
    /// G83 peck drill cycle.
    DrillPeck,
}

impl MotionMode {
    /// True for the canned drilling cycles.
    pub const fn is_cycle(self) -> bool {
        matches!(
            self,
            MotionMode::Drill | MotionMode::DrillDwell | MotionMode::DrillPeck
        )
    }

    /// True for G2/G3.
    pub const fn is_arc(self) -> bool {
        matches!(self, MotionMode::ArcCw | MotionMode::ArcCcw)
    }

    /// The G-word this mode corresponds to, for diagnostics.
    pub const fn g_word(self) -> &'static str {
        match self {
            MotionMode::None => "G80",
            MotionMode::Rapid => "G0",
            MotionMode::Linear => "G1",
            MotionMode::ArcCw => "G2",
            MotionMode::ArcCcw => "G3",
            MotionMode::Drill => "G81",
            MotionMode::DrillDwell => "G82",
            MotionMode::DrillPeck => "G83",
        }
    }
}

/// Active plane (group 2): G17/G18/G19.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Plane {
    #[default]
    Xy,
    Zx,
    Yz,
}

/// Length units (group 6): G20/G21.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Units {
    #[default]
    Millimeters,
    Inches,
}

/// Distance mode (group 3): G90/G91.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceMode {
    #[default]
    Absolute,
    Incremental,
}

/// Cutter radius compensation (group 7): G40/G41/G42.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CutterComp {
    #[default]
    Off,
    Left,
    Right,
}

/// Canned-cycle retract mode (group 10): G98/G99.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetractMode {
    /// G98: retract to the initial Z level.
    #[default]
    InitialLevel,
    /// G99: retract to the R plane.
    RPlane,
}

// ─── Modal Snapshot ─────────────────────────────────────────────────

/// Frozen modal context carried by every canonical command.
///
/// Re-applying a snapshot to a fresh interpreter reproduces the
/// command's execution semantics exactly, regardless of later modal
/// changes in the original run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModalSnapshot {
    pub motion: MotionMode,
    pub plane: Plane,
    pub units: Units,
    pub distance: DistanceMode,
    /// Feed rate [units/min]; 0.0 = none set.
    pub feed_rate: f64,
    /// Programmed spindle speed [rev/min].
    pub spindle_speed: f64,
    pub spindle_dir: SpindleDirection,
    /// Selected tool number.
    pub tool: u32,
    /// Active coordinate system index (0 = G54 .. 8 = G59.3).
    pub coord_system: u8,
    /// Offset of the active coordinate system.
    pub coord_offset: Position,
    pub cutter_comp: CutterComp,
    pub retract: RetractMode,
    pub mist: bool,
    pub flood: bool,
}

// ─── Modal State ────────────────────────────────────────────────────

/// The single mutable modal record for one program run.
#[derive(Debug, Clone, PartialEq)]
pub struct ModalState {
    pub motion: MotionMode,
    pub plane: Plane,
    pub units: Units,
    pub distance: DistanceMode,
    pub feed_rate: f64,
    pub spindle_speed: f64,
    pub spindle_dir: SpindleDirection,
    pub tool: u32,
    pub coord_system: u8,
    /// Offsets of all nine work coordinate systems.
    pub coord_offsets: [Position; COORD_SYSTEM_COUNT],
    pub cutter_comp: CutterComp,
    pub retract: RetractMode,
    pub mist: bool,
    pub flood: bool,
    /// Sticky canned-cycle retract plane (R word).
    pub cycle_r: Option<f64>,
    /// Sticky canned-cycle bottom (Z word).
    pub cycle_z: Option<f64>,
    /// Sticky canned-cycle peck increment (Q word).
    pub cycle_q: Option<f64>,
    /// Sticky canned-cycle dwell time (P word) [s].
    pub cycle_p: Option<f64>,
}

impl Default for ModalState {
    fn default() -> Self {
        Self {
            motion: MotionMode::None,
            plane: Plane::Xy,
            units: Units::Millimeters,
            distance: DistanceMode::Absolute,
            feed_rate: 0.0,
            spindle_speed: 0.0,
            spindle_dir: SpindleDirection::Stopped,
            tool: 0,
            coord_system: 0,
            coord_offsets: [Position::ZERO; COORD_SYSTEM_COUNT],
            cutter_comp: CutterComp::Off,
            retract: RetractMode::InitialLevel,
            mist: false,
            flood: false,
            cycle_r: None,
            cycle_z: None,
            cycle_q: None,
            cycle_p: None,
        }
    }
}

impl ModalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offset of the active coordinate system.
    #[inline]
    pub fn active_offset(&self) -> &Position {
        &self.coord_offsets[self.coord_system as usize]
    }

    /// Freeze the current modal context for a canonical command.
    pub fn snapshot(&self) -> ModalSnapshot {
        ModalSnapshot {
            motion: self.motion,
            plane: self.plane,
            units: self.units,
            distance: self.distance,
            feed_rate: self.feed_rate,
            spindle_speed: self.spindle_speed,
            spindle_dir: self.spindle_dir,
            tool: self.tool,
            coord_system: self.coord_system,
            coord_offset: *self.active_offset(),
            cutter_comp: self.cutter_comp,
            retract: self.retract,
            mist: self.mist,
            flood: self.flood,
        }
    }

    /// Restore modal context from a frozen snapshot.
    ///
    /// Used by the round-trip property: a snapshot applied to a fresh
    /// interpreter must reproduce the originating command's semantics.
    pub fn apply_snapshot(&mut self, snap: &ModalSnapshot) {
        self.motion = snap.motion;
        self.plane = snap.plane;
        self.units = snap.units;
        self.distance = snap.distance;
        self.feed_rate = snap.feed_rate;
        self.spindle_speed = snap.spindle_speed;
        self.spindle_dir = snap.spindle_dir;
        self.tool = snap.tool;
        self.coord_system = snap.coord_system;
        self.coord_offsets[snap.coord_system as usize] = snap.coord_offset;
        self.cutter_comp = snap.cutter_comp;
        self.retract = snap.retract;
        self.mist = snap.mist;
        self.flood = snap.flood;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ncmill_common::types::Axis;

    #[test]
    fn defaults_match_machine_power_up() {
        let m = ModalState::new();
        assert_eq!(m.motion, MotionMode::None);
        assert_eq!(m.plane, Plane::Xy);
        assert_eq!(m.units, Units::Millimeters);
        assert_eq!(m.distance, DistanceMode::Absolute);
        assert_eq!(m.feed_rate, 0.0);
        assert_eq!(m.coord_system, 0);
    }

    #[test]
    fn snapshot_freezes_active_offset_only() {
        let mut m = ModalState::new();
        m.coord_system = 1; // G55
        m.coord_offsets[1].set(Axis::X, 100.0);
        m.coord_offsets[2].set(Axis::X, -5.0);

        let snap = m.snapshot();
        assert_eq!(snap.coord_system, 1);
        assert_eq!(snap.coord_offset.get(Axis::X), 100.0);
    }

    #[test]
    fn snapshot_roundtrip_reproduces_context() {
        let mut m = ModalState::new();
        m.motion = MotionMode::Linear;
        m.units = Units::Inches;
        m.feed_rate = 42.0;
        m.coord_system = 3;
        m.coord_offsets[3].set(Axis::Z, 7.5);
        let snap = m.snapshot();

        // Mutate the original afterwards; the snapshot must not care.
        m.units = Units::Millimeters;
        m.feed_rate = 1.0;

        let mut fresh = ModalState::new();
        fresh.apply_snapshot(&snap);
        assert_eq!(fresh.snapshot(), snap);
    }

    #[test]
    fn motion_mode_classification() {
        assert!(MotionMode::Drill.is_cycle());
        assert!(!MotionMode::Linear.is_cycle());
        assert!(MotionMode::ArcCw.is_arc());
        assert!(!MotionMode::Rapid.is_arc());
        assert_eq!(MotionMode::ArcCcw.g_word(), "G3");
    }
}

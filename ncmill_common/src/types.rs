//! Core value types shared across the workspace.
//!
//! Defines `SeqNo`, the nine controlled axes, and the axis `Position`
//! record carried by canonical commands and status snapshots.

use serde::{Deserialize, Serialize};

use crate::consts::MAX_JOINTS;

// ─── Sequence Numbers ───────────────────────────────────────────────

/// Monotonically increasing identifier correlating emitted canonical
/// commands with execution/status reports.
///
/// Strictly increasing with no gaps and no reuse within a program run.
/// `SeqNo(0)` is reserved as "nothing emitted/completed yet".
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SeqNo(pub u64);

impl SeqNo {
    /// The reserved "none" value.
    pub const NONE: Self = Self(0);

    /// The successor sequence number.
    #[inline]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// True if this is the reserved "none" value.
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for SeqNo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ─── Axes ───────────────────────────────────────────────────────────

/// The nine controllable axes of an NC machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Axis {
    X = 0,
    Y = 1,
    Z = 2,
    A = 3,
    B = 4,
    C = 5,
    U = 6,
    V = 7,
    W = 8,
}

impl Axis {
    /// All axes in joint order.
    pub const ALL: [Axis; MAX_JOINTS] = [
        Axis::X,
        Axis::Y,
        Axis::Z,
        Axis::A,
        Axis::B,
        Axis::C,
        Axis::U,
        Axis::V,
        Axis::W,
    ];

    /// Map an NC word letter to an axis, if it names one.
    pub const fn from_letter(letter: char) -> Option<Self> {
        match letter {
            'X' => Some(Axis::X),
            'Y' => Some(Axis::Y),
            'Z' => Some(Axis::Z),
            'A' => Some(Axis::A),
            'B' => Some(Axis::B),
            'C' => Some(Axis::C),
            'U' => Some(Axis::U),
            'V' => Some(Axis::V),
            'W' => Some(Axis::W),
            _ => None,
        }
    }

    /// The word letter for this axis.
    pub const fn letter(self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
            Axis::A => 'A',
            Axis::B => 'B',
            Axis::C => 'C',
            Axis::U => 'U',
            Axis::V => 'V',
            Axis::W => 'W',
        }
    }
}

// ─── Position ───────────────────────────────────────────────────────

/// A full nine-axis position [user units].
///
/// `Copy` and `repr(C)` so it can live inside status snapshots and
/// canonical commands without allocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[repr(C)]
pub struct Position {
    pub coords: [f64; MAX_JOINTS],
}

impl Position {
    /// Position with all coordinates at zero.
    pub const ZERO: Self = Self {
        coords: [0.0; MAX_JOINTS],
    };

    /// Coordinate along an axis.
    #[inline]
    pub const fn get(&self, axis: Axis) -> f64 {
        self.coords[axis as usize]
    }

    /// Set the coordinate along an axis.
    #[inline]
    pub fn set(&mut self, axis: Axis, value: f64) {
        self.coords[axis as usize] = value;
    }

    /// Component-wise sum (offset application).
    #[inline]
    pub fn offset_by(&self, other: &Position) -> Position {
        let mut out = *self;
        for i in 0..MAX_JOINTS {
            out.coords[i] += other.coords[i];
        }
        out
    }

    /// Euclidean distance over the three linear axes X/Y/Z.
    pub fn linear_distance_to(&self, other: &Position) -> f64 {
        let dx = other.coords[0] - self.coords[0];
        let dy = other.coords[1] - self.coords[1];
        let dz = other.coords[2] - self.coords[2];
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seqno_ordering_and_next() {
        let a = SeqNo(1);
        let b = a.next();
        assert_eq!(b, SeqNo(2));
        assert!(b > a);
        assert!(SeqNo::NONE.is_none());
        assert!(!b.is_none());
    }

    #[test]
    fn axis_letter_roundtrip() {
        for axis in Axis::ALL {
            assert_eq!(Axis::from_letter(axis.letter()), Some(axis));
        }
        assert_eq!(Axis::from_letter('G'), None);
    }

    #[test]
    fn position_get_set_offset() {
        let mut p = Position::ZERO;
        p.set(Axis::X, 10.0);
        p.set(Axis::Z, -2.5);
        assert_eq!(p.get(Axis::X), 10.0);
        assert_eq!(p.get(Axis::Y), 0.0);

        let mut off = Position::ZERO;
        off.set(Axis::X, 5.0);
        let q = p.offset_by(&off);
        assert_eq!(q.get(Axis::X), 15.0);
        assert_eq!(q.get(Axis::Z), -2.5);
    }

    #[test]
    fn linear_distance() {
        let a = Position::ZERO;
        let mut b = Position::ZERO;
        b.set(Axis::X, 3.0);
        b.set(Axis::Y, 4.0);
        assert!((a.linear_distance_to(&b) - 5.0).abs() < 1e-12);
    }
}

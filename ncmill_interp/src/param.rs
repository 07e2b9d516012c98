//! Numbered parameter table (`#1` .. `#5399`).
//!
//! Reading a parameter that was never set is an interpreter error, not a
//! silent zero: undefined references abort the block before any command
//! is emitted. Parameters 1..=30 are local to a subroutine frame; the
//! interpreter saves and restores that range across calls.

use std::collections::HashMap;

use ncmill_common::consts::PARAM_COUNT;

/// Range of parameter numbers that are local to a subroutine call.
pub const LOCAL_PARAM_MAX: u32 = 30;

/// The parameter table for one program run.
#[derive(Debug, Clone, Default)]
pub struct ParamTable {
    values: HashMap<u32, f64>,
}

impl ParamTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `number` is a valid parameter number.
    #[inline]
    pub fn in_range(number: u32) -> bool {
        number >= 1 && (number as usize) < PARAM_COUNT
    }

    /// Read a parameter. `None` if it was never set.
    #[inline]
    pub fn get(&self, number: u32) -> Option<f64> {
        self.values.get(&number).copied()
    }

    /// Write a parameter.
    #[inline]
    pub fn set(&mut self, number: u32, value: f64) {
        self.values.insert(number, value);
    }

    /// True if the parameter has ever been set.
    #[inline]
    pub fn is_set(&self, number: u32) -> bool {
        self.values.contains_key(&number)
    }

    /// Snapshot the local range (1..=30) for a subroutine frame.
    pub fn save_locals(&self) -> Vec<(u32, Option<f64>)> {
        (1..=LOCAL_PARAM_MAX)
            .map(|n| (n, self.get(n)))
            .collect()
    }

    /// Restore a local-range snapshot taken by [`save_locals`].
    ///
    /// Parameters that were unset at save time become unset again, so a
    /// subroutine cannot leak locals into its caller.
    ///
    /// [`save_locals`]: ParamTable::save_locals
    pub fn restore_locals(&mut self, saved: &[(u32, Option<f64>)]) {
        for &(n, v) in saved {
            match v {
                Some(value) => {
                    self.values.insert(n, value);
                }
                None => {
                    self.values.remove(&n);
                }
            }
        }
    }
}

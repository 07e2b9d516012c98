//! System-wide constants for the NCMILL workspace.
//!
//! Single source of truth for all numeric limits and defaults.
//! Imported by all crates — no duplication permitted.

/// Maximum number of controlled joints (X Y Z A B C U V W).
pub const MAX_JOINTS: usize = 9;

/// Default look-ahead depth: maximum unacknowledged canonical commands
/// in the command queue. A tunable, not a historical constant.
pub const DEFAULT_LOOKAHEAD_DEPTH: usize = 32;

/// Default stall-alarm threshold [ms]: how long `enqueue` may keep
/// returning `Busy` before a stall alarm is raised.
pub const DEFAULT_STALL_ALARM_MS: u64 = 2000;

/// Default trajectory executor cycle time in microseconds (1 kHz).
pub const DEFAULT_CYCLE_TIME_US: u64 = 1000;

/// Default status replication cadence [ms].
pub const DEFAULT_STATUS_CADENCE_MS: u64 = 50;

/// Maximum interpreter call-stack depth (subroutines + loops + conditionals).
pub const MAX_CALL_DEPTH: usize = 64;

/// Number of numbered parameters (`#1` .. `#PARAM_COUNT`).
pub const PARAM_COUNT: usize = 5400;

/// Number of work coordinate systems (G54 .. G59.3).
pub const COORD_SYSTEM_COUNT: usize = 9;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/ncmill/ncmill.toml";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_consistent() {
        assert!(MAX_JOINTS > 0 && MAX_JOINTS <= 16);
        assert!(DEFAULT_LOOKAHEAD_DEPTH >= 1);
        assert!(DEFAULT_STALL_ALARM_MS > 0);
        assert!(DEFAULT_CYCLE_TIME_US > 0);
        assert!(DEFAULT_STATUS_CADENCE_MS > 0);
        assert!(MAX_CALL_DEPTH >= 8);
        assert!(COORD_SYSTEM_COUNT == 9);
    }
}

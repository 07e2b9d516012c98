//! NCMILL Common Library
//!
//! This crate provides the shared vocabulary of the NCMILL workspace:
//! constants, core value types, the status snapshot records crossing the
//! real-time boundary, the workspace error taxonomy, and TOML configuration
//! loading.
//!
//! # Module Structure
//!
//! - [`consts`] - System-wide numeric limits and defaults
//! - [`types`] - Sequence numbers, joints, axis positions
//! - [`status`] - Machine/joint/spindle status snapshot records
//! - [`error`] - Error taxonomy shared by all layers
//! - [`config`] - Configuration loading traits and types
//! - [`prelude`] - Common re-exports for convenience

pub mod config;
pub mod consts;
pub mod error;
pub mod prelude;
pub mod status;
pub mod types;

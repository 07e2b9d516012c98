//! RS274 G-code interpreter.
//!
//! Turns NC program text into a canonical sequence of motion and
//! auxiliary commands. The pipeline inside this crate:
//!
//! ```text
//! Program (source lines)
//!   → Cursor (lazy line supply, seekable for subroutines)
//!   → parse_block (words + expressions + parameters)
//!   → Interpreter (modal state, call stack, legality checks)
//!   → CanonicalCommand (frozen modal snapshot, sequence number)
//! ```
//!
//! # Module Structure
//!
//! - [`program`] - Program storage and the seekable line cursor
//! - [`block`] - Block parser entry point and the parsed `Block` type
//! - [`expr`] - RS274 expression/parameter scanner and evaluator
//! - [`param`] - Numbered parameter table
//! - [`modal`] - Modal state record and its frozen snapshot
//! - [`state`] - Interpreter lifecycle state machine
//! - [`emit`] - Canonical command types and the sequence-stamping emitter
//! - [`interp`] - The interpreter proper

pub mod block;
pub mod emit;
pub mod expr;
pub mod interp;
pub mod modal;
pub mod param;
pub mod program;
pub mod state;

pub use block::{parse_block, Block, ParseFailure};
pub use emit::{CanonOp, CanonicalCommand};
pub use interp::Interpreter;
pub use modal::{ModalSnapshot, ModalState};
pub use program::{Cursor, Program};
pub use state::InterpState;

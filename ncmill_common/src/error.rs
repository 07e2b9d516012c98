//! Error taxonomy shared by all NCMILL layers.
//!
//! One taxonomy carries failures from every layer back to the caller:
//! `SyntaxError` (malformed block), `InterpError` (semantically illegal
//! block), `StallAlarm` (back-pressure persisting past the threshold) and
//! `ExecutionFault` (reported by the trajectory executor against a
//! specific sequence number). `Busy` from the command queue is flow
//! control, not an error, and therefore does not appear here.
//!
//! Every error carries the implicated sequence number, or the source line
//! number when the failure happens before emission. No error is silently
//! swallowed.

use thiserror::Error;

use crate::types::SeqNo;

// ─── Syntax Errors ──────────────────────────────────────────────────

/// A malformed block. Not recoverable for that line; execution halts
/// with the program position preserved for diagnostics.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("syntax error at line {line}, column {column}: {detail} (near '{token}')")]
pub struct SyntaxError {
    /// 1-based source line number.
    pub line: u32,
    /// 1-based column of the offending token.
    pub column: u32,
    /// The offending token text.
    pub token: String,
    /// Human-readable detail.
    pub detail: String,
}

impl SyntaxError {
    pub fn new(line: u32, column: u32, token: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            line,
            column,
            token: token.into(),
            detail: detail.into(),
        }
    }
}

// ─── Interpretation Errors ──────────────────────────────────────────

/// What went wrong while interpreting a syntactically valid block.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InterpErrorKind {
    /// Reference to a parameter that was never set.
    #[error("undefined parameter #{number}")]
    UndefinedParameter { number: u32 },

    /// Two words in the block belong to the same modal group.
    #[error("conflicting codes in modal group {group} ({first} and {second})")]
    ConflictingModalGroup {
        group: u8,
        first: String,
        second: String,
    },

    /// A word is illegal under the current modal state.
    #[error("{word} is illegal in the current state: {reason}")]
    IllegalInContext { word: String, reason: String },

    /// Feed motion commanded with no feed rate in effect.
    #[error("feed motion with zero feed rate")]
    MissingFeedRate,

    /// Unknown G/M code number.
    #[error("unknown code {code}")]
    UnknownCode { code: String },

    /// Subroutine label not found.
    #[error("undefined subroutine O{label}")]
    UndefinedSubroutine { label: u32 },

    /// Control-flow nesting exceeded the configured depth limit.
    #[error("call stack depth limit ({limit}) exceeded")]
    CallDepthExceeded { limit: usize },

    /// Mismatched control-flow word (e.g. `endwhile` with no `while`).
    #[error("mismatched control flow word: {word}")]
    MismatchedControlFlow { word: String },

    /// A required word is missing (e.g. R on a canned cycle).
    #[error("missing required word {word}")]
    MissingWord { word: String },

    /// Interpreter is in a terminal state and must be reset first.
    #[error("interpreter is stopped and must be reset")]
    NotRunning,
}

/// A semantically illegal block. Halts interpretation; may be resumable
/// after operator correction depending on configuration.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("interpreter error at line {line}: {kind}")]
pub struct InterpError {
    /// 1-based source line number of the offending block.
    pub line: u32,
    /// Failure category.
    pub kind: InterpErrorKind,
}

impl InterpError {
    pub fn new(line: u32, kind: InterpErrorKind) -> Self {
        Self { line, kind }
    }
}

// ─── Runtime Errors ─────────────────────────────────────────────────

/// Top-level error umbrella for the whole stack.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NcError {
    /// Malformed block.
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    /// Semantically illegal block.
    #[error(transparent)]
    Interp(#[from] InterpError),

    /// `Busy` persisted past the configured stall threshold.
    /// Surfaced as an alarm; does not itself stop the executor.
    #[error("stall alarm: enqueue of {seq} blocked for {waited_ms} ms")]
    StallAlarm {
        /// Sequence number of the command that could not be enqueued.
        seq: SeqNo,
        /// How long the producer waited [ms].
        waited_ms: u64,
    },

    /// Fault reported by the trajectory executor. Always halts further
    /// dispatch and propagates upward regardless of local handling.
    #[error("execution fault at {seq} (joint {joint}): {detail}")]
    ExecutionFault {
        /// Sequence number the fault was reported against.
        seq: SeqNo,
        /// Implicated joint index, `u8::MAX` when not joint-specific.
        joint: u8,
        /// Human-readable detail.
        detail: String,
    },

    /// Enqueue attempted with an out-of-order or reused sequence number.
    #[error("sequence order violation: got {got} after {last}")]
    SequenceOrder {
        /// Highest sequence number previously accepted.
        last: SeqNo,
        /// The offending sequence number.
        got: SeqNo,
    },

    /// Operation attempted on an aborted queue.
    #[error("command queue is aborted")]
    QueueAborted,

    /// Program source could not be read.
    #[error("program load error: {0}")]
    ProgramLoad(String),
}

/// Result alias used across the workspace.
pub type NcResult<T> = Result<T, NcError>;

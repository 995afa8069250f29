//! Error taxonomy and completion status shared by every engine.
//!
//! | Class                 | Type                          | Exit code |
//! |-----------------------|-------------------------------|-----------|
//! | configuration error   | [`StressError::UnknownMethod`] | 1        |
//! | configuration error   | [`StressError::AggregateNotAllowed`] | 1  |
//! | correctness failure   | [`StressError::Correctness`]   | 2        |
//! | resource unavailable  | [`StressError::Resource`]      | 3        |
//! | soft skip             | [`Completion::Skipped`]        | 3        |
//!
//! Hardware faults never appear here: the fault-tolerant engine contains
//! them and at worst reports a [`Completion::Skipped`].

use std::fmt;
use std::io;
use thiserror::Error;

/// Process exit code for a passing run.
pub const EXIT_SUCCESS: i32 = 0;
/// Process exit code for configuration errors.
pub const EXIT_FAILURE: i32 = 1;
/// Process exit code for oracle mismatches.
pub const EXIT_NOT_SUCCESS: i32 = 2;
/// Process exit code for missing resources and soft skips.
pub const EXIT_NO_RESOURCE: i32 = 3;

/// Errors surfaced by the engines to their orchestrator.
#[derive(Error, Debug)]
pub enum StressError {
    #[error("unknown {stressor} method '{name}', must be one of: {}", known.join(" "))]
    UnknownMethod {
        stressor: &'static str,
        name: String,
        known: Vec<&'static str>,
    },

    #[error("duplicate method name '{0}' in registry")]
    DuplicateMethod(&'static str),

    #[error("method name '{0}' is reserved for the aggregate")]
    ReservedMethod(&'static str),

    #[error("'{name}' does not name a single {stressor} method")]
    AggregateNotAllowed { stressor: &'static str, name: String },

    #[error("{what} unavailable: {source}")]
    Resource {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Correctness(#[from] CorrectnessFailure),
}

impl StressError {
    /// Shorthand for a [`StressError::Resource`] built from `errno`.
    pub fn last_os_error(what: &'static str) -> Self {
        StressError::Resource {
            what,
            source: io::Error::last_os_error(),
        }
    }

    /// Whether this error terminates the run before any worker starts.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            StressError::UnknownMethod { .. }
                | StressError::DuplicateMethod(_)
                | StressError::ReservedMethod(_)
                | StressError::AggregateNotAllowed { .. }
        )
    }

    /// Exit code an orchestrator should report for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            StressError::UnknownMethod { .. }
            | StressError::DuplicateMethod(_)
            | StressError::ReservedMethod(_)
            | StressError::AggregateNotAllowed { .. } => EXIT_FAILURE,
            StressError::Correctness(_) => EXIT_NOT_SUCCESS,
            StressError::Resource { .. } => EXIT_NO_RESOURCE,
        }
    }
}

/// An oracle mismatch: the observed value after a burst differs from the
/// closed-form prediction.
///
/// Carries no heap data so it can be produced inside a guarded burst
/// process without allocating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrectnessFailure {
    /// Name of the method whose burst failed verification.
    pub method: &'static str,
    /// Byte offset of the verified location inside the target region.
    pub offset: usize,
    /// Access width in bytes (1 for cache line bytes, 2..16 for misaligned slots).
    pub width: usize,
    /// Value predicted by the oracle.
    pub expected: u128,
    /// Value read back from memory.
    pub observed: u128,
}

impl fmt::Display for CorrectnessFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.width.clamp(1, 16) * 2;
        write!(
            f,
            "{} method: verification error at offset {:#x}, expected {:0digits$x}, got {:0digits$x}",
            self.method,
            self.offset,
            self.expected,
            self.observed,
            digits = digits
        )
    }
}

impl std::error::Error for CorrectnessFailure {}

/// Non-error outcome of an engine run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Every burst that ran was verified.
    Passed,
    /// Nothing could be exercised; not a failure.
    Skipped {
        /// Human-readable explanation for the operator.
        reason: String,
    },
}

impl Completion {
    /// Exit code an orchestrator should report for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            Completion::Passed => EXIT_SUCCESS,
            Completion::Skipped { .. } => EXIT_NO_RESOURCE,
        }
    }

    /// Whether the run was skipped.
    pub fn is_skipped(&self) -> bool {
        matches!(self, Completion::Skipped { .. })
    }
}

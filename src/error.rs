use std::fmt;
use thiserror::Error;

use crate::outcome::OutcomeTracker;

/// Faults raised by a surface driver.
///
/// "Element not there yet" is never one of these; drivers report it as
/// `Ok(None)` from `locate` or `false` from `is_present`.
#[derive(Error, Debug)]
pub enum SurfaceError {
    #[error("Failed to launch surface: {0}")]
    LaunchFailed(String),

    #[error("Interaction failed: {0}")]
    InteractionFailed(String),

    #[error("Surface is no longer available")]
    Gone,

    #[error("Not supported by this surface: {0}")]
    Unsupported(String),

    #[error("CDP error: {0}")]
    CdpError(#[from] chromiumoxide::error::CdpError),

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, SurfaceError>;

/// Which wait of a step timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPhase {
    Precondition,
    Postcondition,
}

impl fmt::Display for WaitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitPhase::Precondition => f.write_str("precondition"),
            WaitPhase::Postcondition => f.write_str("postcondition"),
        }
    }
}

/// Per-step failures. The runner turns every one of these into a
/// `Failed(reason)` outcome for the current item only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    #[error("{phase} timeout at step {step}")]
    StepTimeout { step: String, phase: WaitPhase },

    #[error("no action candidate detectable at step {step} (tried: {})", tried.join(", "))]
    ActionNotFound { step: String, tried: Vec<String> },

    #[error("action '{candidate}' did not register at step {step}: {reason}")]
    ActionDispatch {
        step: String,
        candidate: String,
        reason: String,
    },
}

/// Misuse of the outcome tracker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("item '{0}' already has a recorded outcome")]
    AlreadyRecorded(String),

    #[error("item '{item}' cannot be recorded as {result}: not a terminal outcome")]
    NotTerminal { item: String, result: String },

    /// Only a skip may be recorded for an item that was never begun.
    #[error("item '{item}' cannot be recorded as {result}: it was never started")]
    NotStarted { item: String, result: String },
}

/// Conditions that end a whole run rather than a single item.
#[derive(Error, Debug)]
pub enum RunError {
    /// The operator chose to stop. Items after `item` were never recorded.
    #[error("run aborted by operator before item '{item}'")]
    OperatorAbort {
        item: String,
        partial: Box<OutcomeTracker>,
    },

    /// Nothing to process. Informational, not a fault.
    #[error("item source is empty: {source_desc}")]
    EmptySource { source_desc: String },

    /// The operator could not be asked. Treated like an abort before `item`.
    #[error("operator channel failed before item '{item}': {source}")]
    Operator {
        item: String,
        source: std::io::Error,
        partial: Box<OutcomeTracker>,
    },

    #[error("item source failed: {0:#}")]
    Source(anyhow::Error),
}

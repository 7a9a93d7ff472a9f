//! Stage lifecycle definitions
//!
//! A stage moves strictly forward through these states and never restarts
//! within a run.

use std::fmt;

/// Represents the current state of a pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StageState {
    /// Constructed but not yet started
    Idle,

    /// Producing or consuming work
    Running,

    /// Upstream is exhausted; the stage's own queue may still hold items
    Draining,

    /// Queue joined and every worker returned
    Done,
}

impl StageState {
    /// Returns true if this is the terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Returns true if moving to `next` is allowed
    ///
    /// Only forward moves are legal. Skipping is allowed, so a stage without
    /// an upstream (discovery) may go from Running straight to Done.
    pub fn can_transition_to(&self, next: StageState) -> bool {
        next > *self
    }

    /// Short lowercase label used in logs and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

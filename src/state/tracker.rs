use crate::state::StageState;
use crate::MenagerieError;
use std::sync::Arc;
use tokio::sync::watch;

/// Shared handle on one stage's lifecycle
///
/// Clones observe the same state. Transitions are validated against
/// [`StageState::can_transition_to`] and logged.
#[derive(Debug, Clone)]
pub struct StageTracker {
    stage: &'static str,
    tx: Arc<watch::Sender<StageState>>,
}

impl StageTracker {
    /// Creates a tracker for the named stage in the `Idle` state
    pub fn new(stage: &'static str) -> Self {
        let (tx, _rx) = watch::channel(StageState::Idle);
        Self {
            stage,
            tx: Arc::new(tx),
        }
    }

    /// Name of the tracked stage
    pub fn stage(&self) -> &'static str {
        self.stage
    }

    /// Current state
    pub fn state(&self) -> StageState {
        *self.tx.borrow()
    }

    /// Moves the stage to `to`
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The transition was applied
    /// * `Err(MenagerieError::InvalidTransition)` - `to` is not ahead of the current state
    pub fn advance(&self, to: StageState) -> Result<(), MenagerieError> {
        let mut outcome = Ok(());
        self.tx.send_if_modified(|current| {
            if current.can_transition_to(to) {
                tracing::info!(stage = self.stage, from = %current, to = %to, "Stage transition");
                *current = to;
                true
            } else {
                outcome = Err(MenagerieError::InvalidTransition {
                    stage: self.stage,
                    from: *current,
                    to,
                });
                false
            }
        });
        outcome
    }
}

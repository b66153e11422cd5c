//! Per-document job state machine.

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::types::result::Usage;

/// Lifecycle of one document within a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Extracting,
    Validating,
    Completed,
    Failed,
}

impl JobState {
    /// Completed and Failed are terminal and recorded in the ledger.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Extracting)
                | (Pending, Failed)
                | (Extracting, Extracting)
                | (Extracting, Validating)
                | (Extracting, Failed)
                | (Validating, Completed)
                | (Validating, Failed)
        )
    }
}

/// Rejected state change.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal job transition {from:?} -> {to:?} for {document_id}")]
pub struct TransitionError {
    pub document_id: String,
    pub from: JobState,
    pub to: JobState,
}

/// Book-keeping for one document in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub document_id: String,
    state: JobState,
    pub attempts: u32,
    pub last_error: Option<ErrorKind>,
    pub usage: Usage,
}

impl BatchJob {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            state: JobState::Pending,
            attempts: 0,
            last_error: None,
            usage: Usage::default(),
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Move to `next`, rejecting transitions the state machine does not allow.
    pub fn transition(&mut self, next: JobState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(TransitionError {
                document_id: self.document_id.clone(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut job = BatchJob::new("a");
        job.transition(JobState::Extracting).unwrap();
        job.transition(JobState::Extracting).unwrap();
        job.transition(JobState::Validating).unwrap();
        job.transition(JobState::Completed).unwrap();
        assert!(job.state().is_terminal());
    }

    #[test]
    fn test_no_validation_before_extraction() {
        let mut job = BatchJob::new("a");
        let err = job.transition(JobState::Validating).unwrap_err();
        assert_eq!(err.from, JobState::Pending);
        assert_eq!(job.state(), JobState::Pending);
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [JobState::Completed, JobState::Failed] {
            for next in [
                JobState::Pending,
                JobState::Extracting,
                JobState::Validating,
                JobState::Completed,
                JobState::Failed,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }
}

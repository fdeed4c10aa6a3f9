//! Session states and the transitions allowed between them.

use std::fmt;

use tracing::{debug, warn};

use crate::models::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Navigating,
    SelectingHierarchy,
    AwaitingCaptchaSolve,
    Submitting,
    ClassifyingResult,
    Extracting,
    Recovering,
    Done,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Navigating => "navigating",
            SessionState::SelectingHierarchy => "selecting_hierarchy",
            SessionState::AwaitingCaptchaSolve => "awaiting_captcha_solve",
            SessionState::Submitting => "submitting",
            SessionState::ClassifyingResult => "classifying_result",
            SessionState::Extracting => "extracting",
            SessionState::Recovering => "recovering",
            SessionState::Done => "done",
            SessionState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Done | SessionState::Failed)
    }

    /// Whether `next` may follow `self`. Any live state may fail.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (*self, next),
            (Idle, Navigating)
                | (Navigating, SelectingHierarchy)
                // Villages without surveys end before any captcha.
                | (SelectingHierarchy, AwaitingCaptchaSolve)
                | (SelectingHierarchy, Done)
                | (AwaitingCaptchaSolve, Submitting)
                | (AwaitingCaptchaSolve, Recovering)
                | (Submitting, ClassifyingResult)
                | (Submitting, Recovering)
                | (ClassifyingResult, Extracting)
                | (ClassifyingResult, Recovering)
                | (Extracting, Done)
                | (Recovering, AwaitingCaptchaSolve)
                | (Recovering, Done)
                | (Done, Idle)
                | (Failed, Idle)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current state of one worker's session, with logged transitions.
#[derive(Debug)]
pub struct StateTracker {
    worker_id: usize,
    task: Option<TaskId>,
    state: SessionState,
    transitions: usize,
}

impl StateTracker {
    pub fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            task: None,
            state: SessionState::Idle,
            transitions: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transitions(&self) -> usize {
        self.transitions
    }

    /// Return to `Idle` for a new task.
    pub fn begin(&mut self, task: TaskId) {
        if self.state != SessionState::Idle {
            self.move_to(SessionState::Idle);
        }
        self.task = Some(task);
    }

    /// Move to `next`. Unexpected transitions are logged and still applied,
    /// since the page, not this tracker, is the source of truth.
    pub fn move_to(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        let task = self.task.as_ref().map(TaskId::as_str).unwrap_or("-");
        if !self.state.can_transition_to(next) {
            warn!(
                worker = self.worker_id,
                task,
                "Unexpected session transition {} -> {}",
                self.state,
                next
            );
        }
        debug!(worker = self.worker_id, task, "{} -> {}", self.state, next);
        self.state = next;
        self.transitions += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    #[test]
    fn happy_path_is_allowed() {
        let path = [
            Idle,
            Navigating,
            SelectingHierarchy,
            AwaitingCaptchaSolve,
            Submitting,
            ClassifyingResult,
            Extracting,
            Done,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn recovery_loops_back_to_captcha_only() {
        assert!(ClassifyingResult.can_transition_to(Recovering));
        assert!(Recovering.can_transition_to(AwaitingCaptchaSolve));
        assert!(!Recovering.can_transition_to(SelectingHierarchy));
        assert!(!Recovering.can_transition_to(Navigating));
    }

    #[test]
    fn terminal_states_only_reset() {
        assert!(Done.is_terminal());
        assert!(!Done.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Idle));
        assert!(Submitting.can_transition_to(Failed));
    }

    #[test]
    fn tracker_counts_transitions() {
        let mut tracker = StateTracker::new(0);
        tracker.begin(TaskId::from_raw("a"));
        tracker.move_to(Navigating);
        tracker.move_to(Navigating);
        tracker.move_to(Failed);
        assert_eq!(tracker.state(), Failed);
        assert_eq!(tracker.transitions(), 2);

        tracker.begin(TaskId::from_raw("b"));
        assert_eq!(tracker.state(), Idle);
    }
}

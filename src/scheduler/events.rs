//! Events streamed from the workers to whoever renders progress.

use super::progress::ProgressSnapshot;
use crate::models::TaskId;

/// Emitted during a scheduler run.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    /// A worker picked up a task.
    Started {
        worker_id: usize,
        task_id: TaskId,
        label: String,
    },
    /// A task reached a terminal outcome.
    Finished {
        worker_id: usize,
        task_id: TaskId,
        /// `succeeded`, a no-data reason or a failure reason.
        outcome: &'static str,
        detail: Option<String>,
        progress: ProgressSnapshot,
    },
    /// Already completed in the ledger; never dispatched.
    Skipped {
        task_id: TaskId,
        progress: ProgressSnapshot,
    },
    /// A worker stopped pulling tasks.
    WorkerExited {
        worker_id: usize,
        error: Option<String>,
    },
}

impl SchedulerEvent {
    pub fn progress(&self) -> Option<&ProgressSnapshot> {
        match self {
            SchedulerEvent::Finished { progress, .. } | SchedulerEvent::Skipped { progress, .. } => {
                Some(progress)
            }
            _ => None,
        }
    }
}

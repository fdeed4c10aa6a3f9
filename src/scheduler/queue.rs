//! Shared FIFO of location tasks.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use tracing::debug;

use crate::models::{LocationTask, TaskId};

/// Work queue shared by every worker. Each task is handed out once.
#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: Mutex<VecDeque<LocationTask>>,
    duplicates: usize,
}

impl TaskQueue {
    /// Queue `tasks` in order, dropping any whose id was already queued.
    pub fn new(tasks: impl IntoIterator<Item = LocationTask>) -> Self {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        let mut duplicates = 0;
        for task in tasks {
            if seen.insert(task.id()) {
                queue.push_back(task);
            } else {
                debug!("Dropping duplicate task {}", task.id());
                duplicates += 1;
            }
        }
        Self {
            tasks: Mutex::new(queue),
            duplicates,
        }
    }

    pub fn pop(&self) -> Option<LocationTask> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of the queued tasks, in order.
    pub fn ids(&self) -> Vec<TaskId> {
        self.lock().iter().map(LocationTask::id).collect()
    }

    /// Tasks dropped at construction because their id repeated.
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Remove every queued task matching `pred`, returning them in order.
    pub fn drain_where(&self, mut pred: impl FnMut(&LocationTask) -> bool) -> Vec<LocationTask> {
        let mut tasks = self.lock();
        let (drained, kept): (Vec<_>, Vec<_>) = tasks.drain(..).partition(|t| pred(t));
        tasks.extend(kept);
        drained
    }

    /// Keep only the first `limit` tasks.
    pub fn truncate(&self, limit: usize) -> usize {
        let mut tasks = self.lock();
        let dropped = tasks.len().saturating_sub(limit);
        tasks.truncate(limit);
        dropped
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<LocationTask>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(village: &str) -> LocationTask {
        LocationTask::new("02", "07", village)
    }

    #[test]
    fn drops_duplicate_ids_keeping_order() {
        let queue = TaskQueue::new([task("001"), task("002"), task("001"), task("003")]);
        assert_eq!(queue.duplicates(), 1);
        let order: Vec<_> = std::iter::from_fn(|| queue.pop()).map(|t| t.village).collect();
        assert_eq!(order, ["001", "002", "003"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn labels_do_not_make_tasks_distinct() {
        let queue = TaskQueue::new([task("001"), task("001").with_village_label("ભાડોલ")]);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn drain_and_truncate() {
        let queue = TaskQueue::new([task("001"), task("002"), task("003"), task("004")]);
        let drained = queue.drain_where(|t| t.village == "002");
        assert_eq!(drained.len(), 1);
        assert_eq!(queue.truncate(2), 1);
        assert_eq!(queue.pop().unwrap().village, "001");
        assert_eq!(queue.pop().unwrap().village, "003");
        assert!(queue.pop().is_none());
    }
}

//! Run counters, throughput and ETA.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Tasks per minute over `elapsed`.
pub fn throughput_per_minute(processed: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if processed == 0 || secs <= 0.0 {
        return 0.0;
    }
    processed as f64 / secs * 60.0
}

/// Time to finish `remaining` tasks at `per_minute`. `None` until a rate exists.
pub fn eta(remaining: usize, per_minute: f64) -> Option<Duration> {
    if remaining == 0 {
        return Some(Duration::ZERO);
    }
    if per_minute <= 0.0 || !per_minute.is_finite() {
        return None;
    }
    Some(Duration::from_secs_f64(remaining as f64 / per_minute * 60.0))
}

/// Live counters shared by the workers of one run.
#[derive(Debug)]
pub struct Progress {
    total: usize,
    resumed: AtomicUsize,
    succeeded: AtomicUsize,
    no_data: AtomicUsize,
    failed: AtomicUsize,
    active: AtomicUsize,
    started: Instant,
}

/// Point-in-time view of a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub completed: usize,
    pub resumed: usize,
    pub succeeded: usize,
    pub no_data: usize,
    pub failed: usize,
    pub active_workers: usize,
    pub elapsed: Duration,
    pub per_minute: f64,
    pub eta: Option<Duration>,
}

impl ProgressSnapshot {
    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.completed)
    }
}

/// What the worker observed for a finished task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tally {
    Succeeded,
    NoData,
    Failed,
}

impl Progress {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            resumed: AtomicUsize::new(0),
            succeeded: AtomicUsize::new(0),
            no_data: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            started: Instant::now(),
        }
    }

    pub fn resumed(&self) {
        self.resumed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_started(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_finished(&self, tally: Tally) {
        let counter = match tally {
            Tally::Succeeded => &self.succeeded,
            Tally::NoData => &self.no_data,
            Tally::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Counters now. Throughput counts only tasks processed in this run,
    /// so resumed tasks do not inflate it.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let resumed = self.resumed.load(Ordering::Relaxed);
        let succeeded = self.succeeded.load(Ordering::Relaxed);
        let no_data = self.no_data.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let processed = succeeded + no_data + failed;
        let completed = resumed + processed;
        let elapsed = self.started.elapsed();
        let per_minute = throughput_per_minute(processed, elapsed);
        ProgressSnapshot {
            total: self.total,
            completed,
            resumed,
            succeeded,
            no_data,
            failed,
            active_workers: self.active.load(Ordering::Relaxed),
            elapsed,
            per_minute,
            eta: eta(self.total.saturating_sub(completed), per_minute),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throughput_is_per_minute() {
        assert_eq!(throughput_per_minute(30, Duration::from_secs(60)), 30.0);
        assert_eq!(throughput_per_minute(5, Duration::from_secs(30)), 10.0);
        assert_eq!(throughput_per_minute(0, Duration::from_secs(30)), 0.0);
        assert_eq!(throughput_per_minute(3, Duration::ZERO), 0.0);
    }

    #[test]
    fn eta_from_rate() {
        assert_eq!(eta(20, 10.0), Some(Duration::from_secs(120)));
        assert_eq!(eta(0, 0.0), Some(Duration::ZERO));
        assert_eq!(eta(5, 0.0), None);
    }

    #[test]
    fn snapshot_counts() {
        let progress = Progress::new(5);
        progress.resumed();
        progress.task_started();
        progress.task_started();
        progress.task_finished(Tally::Succeeded);
        progress.task_finished(Tally::NoData);
        progress.task_started();

        let snap = progress.snapshot();
        assert_eq!(snap.completed, 3);
        assert_eq!(snap.remaining(), 2);
        assert_eq!(snap.active_workers, 1);
        assert_eq!((snap.succeeded, snap.no_data, snap.failed), (1, 1, 0));
    }
}

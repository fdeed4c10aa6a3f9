//! Multi-progress display for a scrape run: one summary bar plus one
//! spinner line per worker.

use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use rorscrape::scheduler::ProgressSnapshot;

pub struct ScrapeProgress {
    multi: MultiProgress,
    summary_bar: ProgressBar,
    workers: Vec<ProgressBar>,
}

fn idle_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("  {spinner:.dim} {wide_msg}")
        .unwrap()
}

impl ScrapeProgress {
    pub fn new(num_workers: usize, total: usize) -> Self {
        let multi = MultiProgress::new();

        let summary_bar = multi.add(ProgressBar::new(total as u64));
        summary_bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} {msg} [{bar:30.cyan/blue}] {pos}/{len}")
                .unwrap()
                .progress_chars("█▓░"),
        );
        summary_bar.set_message("Scraping");

        let workers = (0..num_workers)
            .map(|_| {
                let bar = multi.add(ProgressBar::new_spinner());
                bar.set_style(idle_style());
                bar.set_message("idle");
                bar
            })
            .collect();

        Self {
            multi,
            summary_bar,
            workers,
        }
    }

    pub fn start_task(&self, worker_id: usize, label: &str) {
        if let Some(bar) = self.workers.get(worker_id) {
            bar.set_style(
                ProgressStyle::default_spinner()
                    .template("  {spinner:.cyan} {wide_msg} {elapsed:.dim}")
                    .unwrap(),
            );
            bar.reset_elapsed();
            bar.set_message(truncate(label, 40));
            bar.enable_steady_tick(Duration::from_millis(100));
        }
    }

    pub fn finish_task(&self, worker_id: usize) {
        if let Some(bar) = self.workers.get(worker_id) {
            bar.disable_steady_tick();
            bar.set_style(idle_style());
            bar.set_message("idle");
        }
    }

    pub fn worker_exited(&self, worker_id: usize) {
        if let Some(bar) = self.workers.get(worker_id) {
            bar.finish_and_clear();
        }
    }

    /// Move the summary bar to `snapshot`.
    pub fn update(&self, snapshot: &ProgressSnapshot) {
        self.summary_bar.set_length(snapshot.total as u64);
        self.summary_bar.set_position(snapshot.completed as u64);
        self.summary_bar.set_message(summary_message(snapshot));
    }

    pub fn println(&self, message: &str) {
        let _ = self.multi.println(message);
    }

    pub fn finish(&self) {
        for bar in &self.workers {
            bar.finish_and_clear();
        }
        self.summary_bar.finish_and_clear();
    }
}

/// `ok 3 | no data 1 | failed 0 | 2.5/min | ETA 4m10s` style summary.
pub fn summary_message(snapshot: &ProgressSnapshot) -> String {
    let mut message = format!(
        "ok {} | no data {} | failed {}",
        snapshot.succeeded, snapshot.no_data, snapshot.failed
    );
    if snapshot.per_minute > 0.0 {
        message.push_str(&format!(" | {:.1}/min", snapshot.per_minute));
    }
    if let Some(eta) = snapshot.eta.filter(|eta| !eta.is_zero()) {
        message.push_str(&format!(" | ETA {}", format_duration(eta)));
    }
    message
}

/// `1h05m`, `4m10s`, `12s`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h{:02}m", h, m)
    } else if m > 0 {
        format!("{}m{:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", kept)
}

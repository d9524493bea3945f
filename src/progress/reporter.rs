//! Progress reporter implementation
//!
//! One indicatif bar counting finished jobs, with the live
//! running/failed/pending split in its message.

use crate::state::{JobStatus, StatusCounts};
use console::{style, StyledObject};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

/// Progress reporter for a sweep
pub struct SweepProgress {
    bar: ProgressBar,
    enabled: bool,
}

impl SweepProgress {
    /// Create a visible progress reporter
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        let template = "{spinner:.cyan} {prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} jobs {msg}";
        bar.set_style(
            ProgressStyle::default_bar()
                .template(template)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.set_prefix("Sweep");
        bar.enable_steady_tick(Duration::from_millis(200));

        Self {
            bar,
            enabled: true,
        }
    }

    /// Create a disabled progress reporter (for quiet mode)
    pub fn disabled() -> Self {
        let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::hidden());
        Self {
            bar,
            enabled: false,
        }
    }

    /// Check if the bar is drawn
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Set the number of jobs in the sweep
    pub fn set_total(&self, total: usize) {
        self.bar.set_length(total as u64);
    }

    /// Reflect the current job counts
    ///
    /// `finished` counts jobs that will not run again.
    pub fn update(&self, counts: &StatusCounts, finished: usize) {
        self.bar.set_position(finished as u64);
        self.bar.set_message(format!(
            "(running {}, done {}, failed {}, pending {})",
            counts.running, counts.done, counts.failed, counts.pending
        ));
    }

    /// Stop drawing
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for SweepProgress {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Colored status word for terminal tables
pub fn styled_status(status: JobStatus) -> StyledObject<&'static str> {
    let label = style(status.label());
    match status {
        JobStatus::Pending => label.dim(),
        JobStatus::Running => label.cyan(),
        JobStatus::Done => label.green(),
        JobStatus::Failed => label.red().bold(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_reporter() {
        let progress = SweepProgress::disabled();
        assert!(!progress.is_enabled());
        progress.set_total(3);
        progress.update(
            &StatusCounts {
                pending: 1,
                running: 1,
                done: 1,
                failed: 0,
            },
            1,
        );
        progress.finish();
    }

    #[test]
    fn test_styled_status_text() {
        let plain = console::strip_ansi_codes(&styled_status(JobStatus::Failed).to_string()).into_owned();
        assert_eq!(plain, "FAILED");
    }
}

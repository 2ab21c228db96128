//! Progress indicators for deployment runs.

use colored::Colorize;
use converge::{ProgressCallback, TaskKey, TaskOutcome};
use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar over deployment tasks.
pub struct DeployProgress {
    bar: ProgressBar,
    running: usize,
}

impl DeployProgress {
    pub fn new(hidden: bool) -> Self {
        let bar = if hidden {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(0)
        };
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            bar.set_style(style.progress_chars("=>-"));
        }
        Self { bar, running: 0 }
    }
}

impl ProgressCallback for DeployProgress {
    fn on_start(&mut self, total: usize) {
        self.bar.set_length(total as u64);
    }

    fn on_task_start(&mut self, task: &TaskKey) {
        self.running += 1;
        self.bar.set_message(format!("{task}"));
    }

    fn on_task_complete(&mut self, task: &TaskKey, outcome: &TaskOutcome) {
        self.running = self.running.saturating_sub(1);
        let line = match outcome {
            TaskOutcome::Deployed => format!("{} {task}", "✓".green()),
            TaskOutcome::Ignored { reason } => {
                format!("{} {task} {}", "-".dimmed(), format!("({reason})").dimmed())
            }
            TaskOutcome::Failed(_) => format!("{} {task}", "✗".red()),
        };
        self.bar.println(line);
        self.bar.inc(1);
        if self.running > 0 {
            self.bar.set_message(format!("{} running", self.running));
        }
    }

    fn on_finish(&mut self) {
        self.bar.finish_and_clear();
    }
}

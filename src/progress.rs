//! Terminal progress for plan execution

use crate::ui;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use netdeploy::{ExecutionRecord, OperationStep, StepObserver, StepOutcome};

/// Drives a progress bar and prints one line per finished step
pub struct BarProgress {
    bar: Option<ProgressBar>,
    quiet: bool,
}

impl BarProgress {
    pub fn new(quiet: bool) -> Self {
        Self { bar: None, quiet }
    }

    fn style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-")
    }
}

impl StepObserver for BarProgress {
    fn on_plan_start(&mut self, total: usize, dry_run: bool) {
        if self.quiet || total == 0 {
            return;
        }
        let bar = ProgressBar::new(total as u64);
        bar.set_style(Self::style());
        if dry_run {
            bar.set_message("previewing");
        }
        self.bar = Some(bar);
    }

    fn on_step_start(&mut self, _index: usize, step: &OperationStep) {
        if let Some(bar) = &self.bar {
            bar.set_message(step.kind.to_string());
        }
    }

    fn on_step_complete(&mut self, index: usize, step: &OperationStep, outcome: &StepOutcome) {
        let Some(bar) = &self.bar else {
            return;
        };
        let mut line = format!(
            "  {} {step} {}",
            format!("{:>2}.", index + 1).dimmed(),
            ui::outcome_badge(outcome)
        );
        if let StepOutcome::Failed { cause } = outcome {
            line.push_str(&format!("\n      {}", cause.red()));
        }
        bar.println(line);
        bar.inc(1);
    }

    fn on_plan_complete(&mut self, _record: &ExecutionRecord) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

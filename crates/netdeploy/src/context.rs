//! Observer hooks for plan execution
//!
//! The executor reports progress through [`StepObserver`] so callers can
//! drive progress bars or logs without the library depending on either.

use crate::executor::{ExecutionRecord, StepOutcome};
use crate::plan::OperationStep;

/// Progress callback for plan execution
pub trait StepObserver {
    /// Called once before the first step
    fn on_plan_start(&mut self, total: usize, dry_run: bool);

    /// Called before a step is applied
    fn on_step_start(&mut self, index: usize, step: &OperationStep);

    /// Called after a step was applied (or skipped)
    fn on_step_complete(&mut self, index: usize, step: &OperationStep, outcome: &StepOutcome);

    /// Called once after the last attempted step
    fn on_plan_complete(&mut self, record: &ExecutionRecord);
}

/// No-op observer
pub struct NoProgress;

impl StepObserver for NoProgress {
    fn on_plan_start(&mut self, _total: usize, _dry_run: bool) {}
    fn on_step_start(&mut self, _index: usize, _step: &OperationStep) {}
    fn on_step_complete(&mut self, _index: usize, _step: &OperationStep, _outcome: &StepOutcome) {}
    fn on_plan_complete(&mut self, _record: &ExecutionRecord) {}
}

/// Observer that writes each outcome to the `log` facade
pub struct LogProgress;

impl StepObserver for LogProgress {
    fn on_plan_start(&mut self, total: usize, dry_run: bool) {
        if dry_run {
            log::info!("Previewing {total} steps");
        } else {
            log::info!("Applying {total} steps");
        }
    }

    fn on_step_start(&mut self, index: usize, step: &OperationStep) {
        log::debug!("[{}] {step}", index + 1);
    }

    fn on_step_complete(&mut self, index: usize, step: &OperationStep, outcome: &StepOutcome) {
        match outcome {
            StepOutcome::Failed { cause } => log::error!("[{}] {step}: {cause}", index + 1),
            other => log::info!("[{}] {step}: {other}", index + 1),
        }
    }

    fn on_plan_complete(&mut self, record: &ExecutionRecord) {
        let summary = record.summary();
        log::info!(
            "{} applied, {} unchanged, {} skipped, {} failed",
            summary.applied,
            summary.unchanged,
            summary.skipped,
            summary.failed
        );
    }
}

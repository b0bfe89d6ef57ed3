//! Executor - applies a plan step by step
//!
//! Steps run strictly in order. The first failing step halts the run and
//! the partial [`ExecutionRecord`] is returned; whether to roll back is the
//! caller's decision.

use crate::backend::{Change, NetworkBackend};
use crate::context::StepObserver;
use crate::error::Error;
use crate::plan::{OperationStep, Plan, Reversal, StepKind};
use crate::types::ExecuteSummary;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Result of one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    /// The host was changed
    Applied,
    /// The host already matched (create of something present, delete of
    /// something absent)
    Unchanged,
    /// Not executed (dry run)
    Skipped { would_execute: bool },
    Failed { cause: String },
}

impl StepOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Applied => write!(f, "applied"),
            Self::Unchanged => write!(f, "unchanged"),
            Self::Skipped { would_execute: true } => write!(f, "would apply"),
            Self::Skipped { would_execute: false } => write!(f, "skipped"),
            Self::Failed { cause } => write!(f, "failed: {cause}"),
        }
    }
}

/// A step together with what happened to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub step: OperationStep,
    pub outcome: StepOutcome,
    pub at: DateTime<Utc>,
}

/// How far a plan got
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionRecord {
    pub dry_run: bool,
    entries: Vec<StepRecord>,
    /// Number of steps in the plan that produced this record
    planned: usize,
}

impl ExecutionRecord {
    fn new(dry_run: bool, planned: usize) -> Self {
        Self {
            dry_run,
            entries: Vec::with_capacity(planned),
            planned,
        }
    }

    pub fn entries(&self) -> &[StepRecord] {
        &self.entries
    }

    /// The step that halted execution, if any
    pub fn failure(&self) -> Option<&StepRecord> {
        self.entries.iter().find(|e| e.outcome.is_failure())
    }

    pub fn is_success(&self) -> bool {
        self.failure().is_none()
    }

    /// Steps that changed the host, in execution order
    pub fn applied_steps(&self) -> impl Iterator<Item = &OperationStep> {
        self.entries
            .iter()
            .filter(|e| e.outcome == StepOutcome::Applied)
            .map(|e| &e.step)
    }

    /// Step kinds and outcomes without timestamps
    pub fn outcomes(&self) -> Vec<(&StepKind, &StepOutcome)> {
        self.entries
            .iter()
            .map(|e| (&e.step.kind, &e.outcome))
            .collect()
    }

    pub fn summary(&self) -> ExecuteSummary {
        let mut summary = ExecuteSummary {
            not_attempted: self.planned.saturating_sub(self.entries.len()),
            ..Default::default()
        };
        for entry in &self.entries {
            match entry.outcome {
                StepOutcome::Applied => summary.applied += 1,
                StepOutcome::Unchanged => summary.unchanged += 1,
                StepOutcome::Skipped { .. } => summary.skipped += 1,
                StepOutcome::Failed { .. } => summary.failed += 1,
            }
        }
        summary
    }

    /// Convert the failing step into an error carrying its identity
    pub fn error(&self) -> Option<Error> {
        self.failure().map(|entry| Error::ApplyStepFailed {
            step: entry.step.to_string(),
            cause: match &entry.outcome {
                StepOutcome::Failed { cause } => cause.clone(),
                other => other.to_string(),
            },
        })
    }

    /// Plan that reverses every applied step, newest first.
    ///
    /// Steps that can only be undone by restoring a snapshot are returned
    /// separately.
    pub fn undo_plan(&self) -> UndoPlan {
        let mut steps = Vec::new();
        let mut irreversible = Vec::new();
        let applied: Vec<_> = self.applied_steps().collect();
        for step in applied.into_iter().rev() {
            match &step.reverse {
                Reversal::Step(kind) => {
                    steps.push(OperationStep::cleanup(kind.clone(), step.plane));
                }
                Reversal::RequiresSnapshot => irreversible.push(step.clone()),
            }
        }
        UndoPlan {
            plan: Plan::new(steps, Vec::new()),
            irreversible,
        }
    }
}

/// Reverse steps of an execution record
#[derive(Debug, Clone)]
pub struct UndoPlan {
    pub plan: Plan,
    /// Applied steps with no reverse step
    pub irreversible: Vec<OperationStep>,
}

/// Execute `plan` against `backend`.
///
/// With `dry_run` every step is recorded as skipped and the backend is
/// never called.
pub fn apply<B: NetworkBackend + ?Sized>(
    plan: &Plan,
    dry_run: bool,
    backend: &B,
    observer: &mut dyn StepObserver,
) -> ExecutionRecord {
    let mut record = ExecutionRecord::new(dry_run, plan.len());
    observer.on_plan_start(plan.len(), dry_run);

    for (index, step) in plan.steps().enumerate() {
        observer.on_step_start(index, step);
        let outcome = if dry_run {
            StepOutcome::Skipped {
                would_execute: true,
            }
        } else {
            run_step(backend, step)
        };
        observer.on_step_complete(index, step, &outcome);

        let halt = outcome.is_failure();
        record.entries.push(StepRecord {
            step: step.clone(),
            outcome,
            at: Utc::now(),
        });
        if halt {
            log::warn!(
                "Halting after failed step {} of {}: {step}",
                index + 1,
                plan.len()
            );
            break;
        }
    }

    observer.on_plan_complete(&record);
    record
}

fn run_step<B: NetworkBackend + ?Sized>(backend: &B, step: &OperationStep) -> StepOutcome {
    match backend.apply(&step.kind) {
        Ok(Change::Applied) => StepOutcome::Applied,
        Ok(Change::AlreadyInState) => StepOutcome::Unchanged,
        Err(e) if tolerated(&step.kind, &e) => {
            log::debug!("{step}: {e} (treated as unchanged)");
            StepOutcome::Unchanged
        }
        Err(e) => StepOutcome::Failed {
            cause: e.to_string(),
        },
    }
}

/// Deleting something absent and creating something present both leave
/// the host in the requested state.
fn tolerated(kind: &StepKind, err: &Error) -> bool {
    match err {
        Error::ConnectionNotFound { .. } => kind.is_delete(),
        Error::ConnectionExists { .. } => kind.creates().is_some(),
        _ => false,
    }
}

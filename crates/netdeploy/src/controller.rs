//! Deployment state machine
//!
//! ```text
//! Idle -> BackingUp -> Applying -> Verifying -> Committed ----> Terminal
//!   |                     |            |                          ^
//!   | (preview)           | (failed)   +-> RollingBack -----------+
//!   +---------------------+----------------------------------------+
//! ```
//!
//! Once Applying has started a deployment always runs to Committed or
//! RollingBack before returning. A failed apply terminates without rollback;
//! a failed reachability check brings up the rescue connection.

use crate::backend::{Host, Prober};
use crate::backup::BackupStore;
use crate::compare::{self, ComparisonReport};
use crate::compiler;
use crate::context::{LogProgress, StepObserver};
use crate::error::{Error, Result};
use crate::executor::{self, ExecutionRecord};
use crate::oracle::{self, Clock, ProbeOptions, SystemClock, Verdict};
use crate::plan::Plan;
use crate::snapshot::{Snapshot, SnapshotId};
use crate::topology::Topology;
use crate::types::ExecuteSummary;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

static SYSTEM_CLOCK: SystemClock = SystemClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployPhase {
    Idle,
    BackingUp,
    Applying,
    Verifying,
    Committed,
    RollingBack,
    Terminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    DeployRequested,
    PreviewRequested,
    SnapshotSaved,
    SnapshotFailed,
    ApplySucceeded,
    ApplyFailed,
    Reachable,
    Unreachable,
    RescueFinished,
    Finished,
}

impl DeployPhase {
    /// Transition table. `None` means the trigger is not valid in this phase.
    pub fn next(self, trigger: Trigger) -> Option<Self> {
        use DeployPhase::*;
        use Trigger::*;

        match (self, trigger) {
            (Idle, DeployRequested) => Some(BackingUp),
            (Idle, PreviewRequested) => Some(Terminal),
            (BackingUp, SnapshotSaved | SnapshotFailed) => Some(Applying),
            (Applying, ApplySucceeded) => Some(Verifying),
            (Applying, ApplyFailed) => Some(Terminal),
            (Verifying, Reachable) => Some(Committed),
            (Verifying, Unreachable) => Some(RollingBack),
            (Committed, Finished) => Some(Terminal),
            (RollingBack, RescueFinished) => Some(Terminal),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Terminal
    }
}

impl fmt::Display for DeployPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::BackingUp => "backing-up",
            Self::Applying => "applying",
            Self::Verifying => "verifying",
            Self::Committed => "committed",
            Self::RollingBack => "rolling-back",
            Self::Terminal => "terminal",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One run of the state machine
#[derive(Debug)]
struct Machine {
    phase: DeployPhase,
    visited: Vec<DeployPhase>,
}

impl Machine {
    fn new() -> Self {
        Self {
            phase: DeployPhase::Idle,
            visited: vec![DeployPhase::Idle],
        }
    }

    fn fire(&mut self, trigger: Trigger) -> Result<()> {
        let next = self
            .phase
            .next(trigger)
            .ok_or_else(|| Error::InvalidTransition {
                phase: self.phase.to_string(),
                trigger: trigger.to_string(),
            })?;
        log::info!("{} -> {next} ({trigger})", self.phase);
        self.phase = next;
        self.visited.push(next);
        Ok(())
    }
}

/// What to do when the main plan fails part way
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApplyFailurePolicy {
    /// Stop and leave the partial state for an explicit restore
    #[default]
    LeaveForOperator,
    /// Delete what the failed run created before stopping
    UndoApplied,
}

#[derive(Debug, Clone)]
pub struct DeployOptions {
    /// Compile and preview only
    pub dry_run: bool,
    pub probe: ProbeOptions,
    /// Pause between taking the snapshot and the first mutation
    pub pre_apply_delay: Duration,
    pub failure_policy: ApplyFailurePolicy,
    /// Probe this address instead of the topology's default gateway
    pub probe_target: Option<IpAddr>,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            probe: ProbeOptions::default(),
            pre_apply_delay: Duration::from_secs(5),
            failure_policy: ApplyFailurePolicy::default(),
            probe_target: None,
        }
    }
}

/// Final status of a deployment
#[derive(Debug)]
pub enum DeployResult {
    Success,
    /// The main plan failed; no rollback was attempted
    Failed { cause: Error },
    /// Verification failed and the rescue plan ran
    RolledBack {
        cause: Error,
        /// Set when the rescue connection could not be brought up
        rescue_error: Option<Error>,
    },
}

impl DeployResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Management is unreachable and the rescue failed
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Self::RolledBack {
                rescue_error: Some(_),
                ..
            }
        )
    }
}

/// The emergency plan and how it went
#[derive(Debug)]
pub struct RescueReport {
    pub plan: Option<Plan>,
    pub record: Option<ExecutionRecord>,
}

/// Everything an operator needs to see how far a deployment got
#[derive(Debug)]
pub struct DeployReport {
    pub result: DeployResult,
    pub phases: Vec<DeployPhase>,
    pub dry_run: bool,
    pub snapshot_id: Option<SnapshotId>,
    pub plan: Plan,
    pub summary: ExecuteSummary,
    /// The main execution record; kept for previews and failures
    pub record: Option<ExecutionRecord>,
    pub verdict: Option<Verdict>,
    pub rescue: Option<RescueReport>,
    /// Execution of the undo plan under [`ApplyFailurePolicy::UndoApplied`]
    pub undo: Option<ExecutionRecord>,
}

/// Outcome of restoring a snapshot
#[derive(Debug)]
pub struct RestoreResult {
    pub snapshot_id: SnapshotId,
    pub plan: Plan,
    pub record: ExecutionRecord,
}

impl RestoreResult {
    pub fn is_success(&self) -> bool {
        self.record.is_success()
    }
}

/// Drives deployments, restores and previews against one host
pub struct Deployer<'a> {
    host: &'a dyn Host,
    prober: &'a dyn Prober,
    store: &'a mut dyn BackupStore,
    clock: &'a dyn Clock,
    observer: Box<dyn StepObserver + 'a>,
    options: DeployOptions,
}

impl<'a> Deployer<'a> {
    pub fn new(host: &'a dyn Host, prober: &'a dyn Prober, store: &'a mut dyn BackupStore) -> Self {
        Self {
            host,
            prober,
            store,
            clock: &SYSTEM_CLOCK,
            observer: Box::new(LogProgress),
            options: DeployOptions::default(),
        }
    }

    pub fn with_options(mut self, options: DeployOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_clock(mut self, clock: &'a dyn Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_observer(mut self, observer: impl StepObserver + 'a) -> Self {
        self.observer = Box::new(observer);
        self
    }

    pub fn options(&self) -> &DeployOptions {
        &self.options
    }

    /// Compile against the host's current connections
    pub fn compile(&self, topology: &Topology) -> Result<Plan> {
        let current = self.host.current_state()?;
        compiler::compile(topology, &current)
    }

    /// Compile and dry-run without touching the host
    pub fn preview(&mut self, topology: &Topology) -> Result<(Plan, ExecutionRecord)> {
        let plan = self.compile(topology)?;
        let record = executor::apply(&plan, true, self.host, &mut *self.observer);
        Ok((plan, record))
    }

    pub fn compare(&self, topology: &Topology) -> Result<ComparisonReport> {
        let current = self.host.current_state()?;
        Ok(compare::compare(topology, &current))
    }

    pub fn probe(&self, target: IpAddr, options: &ProbeOptions) -> Verdict {
        oracle::probe(self.prober, self.clock, target, options)
    }

    /// Capture the host and save it to the backup store
    pub fn snapshot(&mut self) -> Result<SnapshotId> {
        let contents = self.host.capture().map_err(|e| match e {
            Error::SnapshotFailed { .. } => e,
            other => Error::SnapshotFailed {
                reason: other.to_string(),
            },
        })?;
        let snapshot = Snapshot::new(&contents, Utc::now())?;
        let id = self.store.save(snapshot).map_err(|e| Error::SnapshotFailed {
            reason: e.to_string(),
        })?;
        log::info!(
            "Saved snapshot {id} ({} connections)",
            contents.connections.len()
        );
        Ok(id)
    }

    /// Run one deployment attempt to a terminal state.
    ///
    /// Invalid topologies are returned as `Err` before the host is touched.
    /// Every other outcome, including failures, is reported in the
    /// [`DeployReport`].
    pub fn run_deployment(&mut self, topology: &Topology) -> Result<DeployReport> {
        self.deploy(topology, None)
    }

    /// Like [`Deployer::run_deployment`], but only if the host still compiles
    /// to `confirmed`, the plan an operator approved.
    ///
    /// Fails with [`Error::Compile`] before any mutation when the connections
    /// on the host changed since `confirmed` was compiled.
    pub fn run_confirmed(&mut self, topology: &Topology, confirmed: &Plan) -> Result<DeployReport> {
        self.deploy(topology, Some(confirmed))
    }

    fn deploy(&mut self, topology: &Topology, confirmed: Option<&Plan>) -> Result<DeployReport> {
        let mut machine = Machine::new();
        let plan = self.compile(topology)?;
        if confirmed.is_some_and(|expected| *expected != plan) {
            return Err(Error::compile(
                "host connections changed after the plan was confirmed",
            ));
        }
        let target = self
            .options
            .probe_target
            .or_else(|| topology.default_gateway())
            .ok_or_else(|| Error::invalid("no gateway to verify reachability against"))?;

        if self.options.dry_run {
            machine.fire(Trigger::PreviewRequested)?;
            let record = executor::apply(&plan, true, self.host, &mut *self.observer);
            return Ok(DeployReport {
                result: DeployResult::Success,
                phases: machine.visited,
                dry_run: true,
                snapshot_id: None,
                summary: record.summary(),
                plan,
                record: Some(record),
                verdict: None,
                rescue: None,
                undo: None,
            });
        }

        machine.fire(Trigger::DeployRequested)?;
        let snapshot_id = match self.snapshot() {
            Ok(id) => {
                machine.fire(Trigger::SnapshotSaved)?;
                Some(id)
            }
            Err(e) => {
                log::warn!("Continuing without a restore point: {e}");
                machine.fire(Trigger::SnapshotFailed)?;
                None
            }
        };

        if !self.options.pre_apply_delay.is_zero() {
            log::info!(
                "Reconfiguring network in {}s",
                self.options.pre_apply_delay.as_secs()
            );
            self.clock.sleep(self.options.pre_apply_delay);
        }

        let record = executor::apply(&plan, false, self.host, &mut *self.observer);
        let summary = record.summary();

        if let Some(cause) = record.error() {
            machine.fire(Trigger::ApplyFailed)?;
            log::error!("Deployment failed: {cause}");
            let undo = match self.options.failure_policy {
                ApplyFailurePolicy::UndoApplied => Some(self.undo(&record)),
                ApplyFailurePolicy::LeaveForOperator => {
                    match &snapshot_id {
                        Some(id) => log::warn!(
                            "Host left partially configured; `hostnet rollback --id {id}` restores it"
                        ),
                        None => log::warn!("Host left partially configured and no snapshot exists"),
                    }
                    None
                }
            };
            return Ok(DeployReport {
                result: DeployResult::Failed { cause },
                phases: machine.visited,
                dry_run: false,
                snapshot_id,
                plan,
                summary,
                record: Some(record),
                verdict: None,
                rescue: None,
                undo,
            });
        }
        machine.fire(Trigger::ApplySucceeded)?;

        let verdict = oracle::probe(self.prober, self.clock, target, &self.options.probe);
        if verdict.reachable {
            machine.fire(Trigger::Reachable)?;
            log::info!("{}", verdict.describe());
            machine.fire(Trigger::Finished)?;
            return Ok(DeployReport {
                result: DeployResult::Success,
                phases: machine.visited,
                dry_run: false,
                snapshot_id,
                plan,
                summary,
                record: None,
                verdict: Some(verdict),
                rescue: None,
                undo: None,
            });
        }

        machine.fire(Trigger::Unreachable)?;
        let cause = Error::VerificationFailed {
            target: target.to_string(),
            detail: verdict.describe(),
        };
        log::error!("{cause}; bringing up rescue connection");
        let (rescue, rescue_error) = self.rescue(topology);
        machine.fire(Trigger::RescueFinished)?;

        Ok(DeployReport {
            result: DeployResult::RolledBack {
                cause,
                rescue_error,
            },
            phases: machine.visited,
            dry_run: false,
            snapshot_id,
            plan,
            summary,
            record: Some(record),
            verdict: Some(verdict),
            rescue: Some(rescue),
            undo: None,
        })
    }

    /// Restore the most recent snapshot
    pub fn rollback(&mut self) -> Result<RestoreResult> {
        let snapshot = self.store.latest()?;
        self.restore_snapshot(&snapshot)
    }

    /// Restore a specific snapshot
    pub fn restore(&mut self, id: &SnapshotId) -> Result<RestoreResult> {
        let snapshot = self.store.get(id)?;
        self.restore_snapshot(&snapshot)
    }

    fn restore_snapshot(&mut self, snapshot: &Snapshot) -> Result<RestoreResult> {
        let contents = snapshot.contents()?;
        let current = self.host.current_state()?;
        let plan = compiler::compile_restore(&contents, &current);
        log::info!(
            "Restoring snapshot {} ({} connections)",
            snapshot.id,
            contents.connections.len()
        );
        let record = executor::apply(&plan, self.options.dry_run, self.host, &mut *self.observer);
        if let Some(e) = record.error() {
            log::error!("Restore of {} stopped: {e}", snapshot.id);
        }
        Ok(RestoreResult {
            snapshot_id: snapshot.id.clone(),
            plan,
            record,
        })
    }

    fn rescue(&mut self, topology: &Topology) -> (RescueReport, Option<Error>) {
        let plan = match compiler::compile_rescue(topology) {
            Ok(plan) => plan,
            Err(e) => {
                log::error!("CRIT: could not compile rescue plan: {e}");
                let err = Error::RollbackFailed {
                    step: "compile rescue".into(),
                    cause: e.to_string(),
                };
                return (
                    RescueReport {
                        plan: None,
                        record: None,
                    },
                    Some(err),
                );
            }
        };

        let record = executor::apply(&plan, false, self.host, &mut *self.observer);
        let error = record.failure().map(|entry| {
            let err = Error::RollbackFailed {
                step: entry.step.to_string(),
                cause: entry.outcome.to_string(),
            };
            log::error!("CRIT: {err}; console access is required");
            err
        });
        if error.is_none() {
            log::warn!("Rescue connection is up; management reachable without bridges");
        }
        (
            RescueReport {
                plan: Some(plan),
                record: Some(record),
            },
            error,
        )
    }

    fn undo(&mut self, record: &ExecutionRecord) -> ExecutionRecord {
        let undo = record.undo_plan();
        if !undo.irreversible.is_empty() {
            log::warn!(
                "{} applied steps can only be undone by restoring a snapshot",
                undo.irreversible.len()
            );
        }
        log::info!("Undoing {} applied steps", undo.plan.len());
        executor::apply(&undo.plan, false, self.host, &mut *self.observer)
    }
}

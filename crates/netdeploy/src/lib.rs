//! # Netdeploy
//!
//! Deploys a bonded, VLAN-aware network layout onto a host and rolls it back
//! when the host loses its management uplink.
//!
//! ## Core Concepts
//!
//! - **Topology**: the desired planes (storage, management, public), each a
//!   bond over physical NICs feeding a bridge, optionally through a VLAN
//! - **Plan**: an ordered list of connection operations, cleanup then build
//! - **Executor**: applies a plan step by step and halts on the first failure
//! - **Oracle**: decides whether the default gateway is still reachable
//! - **Deployer**: the state machine tying backup, apply, verify and rescue
//!   together
//!
//! ## Example
//!
//! ```ignore
//! use netdeploy::{Deployer, DirBackupStore, NmcliBackend, PingProber, Topology};
//!
//! let host = NmcliBackend::new();
//! let prober = PingProber::new();
//! let mut store = DirBackupStore::open("/var/lib/hostnet/backups", 5)?;
//!
//! let report = Deployer::new(&host, &prober, &mut store).run_deployment(&topology)?;
//! if !report.result.is_success() {
//!     eprintln!("deployment did not commit: {:?}", report.result);
//! }
//! ```
//!
//! ## Host Traits
//!
//! Everything that touches the machine sits behind a trait:
//!
//! - [`StateReader`]: lists existing connection definitions
//! - [`NetworkBackend`]: applies one operation
//! - [`SnapshotSource`]: captures restorable state
//! - [`Prober`]: sends a single reachability probe
//!
//! The `nmcli` and `ping` implementations live in [`backend`].

pub mod archive;
pub mod backend;
pub mod backup;
pub mod compare;
pub mod compiler;
pub mod context;
pub mod controller;
pub mod error;
pub mod executor;
pub mod oracle;
pub mod plan;
pub mod reserved;
pub mod snapshot;
pub mod topology;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export main types at crate root
pub use backend::{
    Change, CommandRunner, Host, NetworkBackend, NmcliBackend, PingProber, Prober,
    SnapshotSource, StateReader, SystemRunner,
};
pub use backup::{BackupStore, DEFAULT_RETENTION, DirBackupStore, MemoryBackupStore};
pub use compare::{ComparisonReport, CompareSummary, compare};
pub use compiler::{compile, compile_restore, compile_rescue};
pub use context::{LogProgress, NoProgress, StepObserver};
pub use controller::{
    ApplyFailurePolicy, DeployOptions, DeployPhase, DeployReport, DeployResult, Deployer,
    RescueReport, RestoreResult, Trigger,
};
pub use error::{Error, ErrorCategory, Result};
pub use executor::{ExecutionRecord, StepOutcome, StepRecord, UndoPlan, apply};
pub use oracle::{Clock, ProbeOptions, SystemClock, Verdict, probe};
pub use plan::{OperationStep, Phase, Plan, StepKind};
pub use reserved::{RESCUE_CONNECTION, ReservedNames};
pub use snapshot::{Snapshot, SnapshotContents, SnapshotId, SnapshotMeta};
pub use topology::{BondMode, Cidr, NetworkPlane, PlaneMode, PlaneName, Topology};
pub use types::{ConnectionKind, CurrentState, ExecuteSummary, ExistingConnection};

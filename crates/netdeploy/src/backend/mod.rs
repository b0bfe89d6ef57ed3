//! Host-facing collaborators.
//!
//! The compiler, executor and controller only see these traits, so the
//! same state machine runs against `nmcli` on a real host and against
//! in-memory fakes in tests.

pub mod nmcli;
pub mod ping;
pub mod runner;

pub use nmcli::NmcliBackend;
pub use ping::PingProber;
pub use runner::{CommandRunner, SystemRunner};

use crate::error::Result;
use crate::plan::StepKind;
use crate::snapshot::SnapshotContents;
use crate::types::CurrentState;
use std::net::IpAddr;
use std::time::Duration;

/// What applying a step did to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Applied,
    /// The host already matched the step
    AlreadyInState,
}

/// Lists the connections currently defined on the host.
pub trait StateReader {
    fn current_state(&self) -> Result<CurrentState>;
}

/// Applies a single plan step to the host.
///
/// Implementations must be idempotent: creating something that exists or
/// deleting something absent returns [`Change::AlreadyInState`].
pub trait NetworkBackend {
    fn apply(&self, step: &StepKind) -> Result<Change>;
}

/// Sends one reachability probe.
pub trait Prober {
    /// Probe `target`, waiting at most `timeout`. Returns the round-trip time.
    fn probe_once(&self, target: IpAddr, timeout: Duration) -> Result<Duration>;
}

/// Captures connection definitions and interface state for a snapshot.
pub trait SnapshotSource {
    fn capture(&self) -> Result<SnapshotContents>;
}

/// Everything the controller needs from the host
pub trait Host: StateReader + NetworkBackend + SnapshotSource {}

impl<T: StateReader + NetworkBackend + SnapshotSource> Host for T {}

//! Core types shared by the compiler, executor and backends

use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::Output;

/// Kind of a network connection as reported by the host
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Bond,
    Bridge,
    Vlan,
    Ethernet,
    Other(String),
}

impl ConnectionKind {
    /// Map an `nmcli` connection type onto a kind
    pub fn from_nmcli(type_name: &str) -> Self {
        match type_name {
            "bond" => Self::Bond,
            "bridge" => Self::Bridge,
            "vlan" => Self::Vlan,
            "802-3-ethernet" | "ethernet" => Self::Ethernet,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bond => write!(f, "bond"),
            Self::Bridge => write!(f, "bridge"),
            Self::Vlan => write!(f, "vlan"),
            Self::Ethernet => write!(f, "ethernet"),
            Self::Other(name) => write!(f, "{name}"),
        }
    }
}

/// A connection definition that exists on the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingConnection {
    pub name: String,
    pub kind: ConnectionKind,
    /// Device the connection is active on, if any
    #[serde(default)]
    pub device: Option<String>,
}

impl ExistingConnection {
    pub fn new(name: impl Into<String>, kind: ConnectionKind) -> Self {
        Self {
            name: name.into(),
            kind,
            device: None,
        }
    }
}

/// Snapshot of the connection names and types currently defined on the host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentState {
    connections: Vec<ExistingConnection>,
}

impl CurrentState {
    pub fn new(connections: Vec<ExistingConnection>) -> Self {
        Self { connections }
    }

    pub fn connections(&self) -> &[ExistingConnection] {
        &self.connections
    }

    /// Look up a connection by name
    pub fn get(&self, name: &str) -> Option<&ExistingConnection> {
        self.connections.iter().find(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl FromIterator<ExistingConnection> for CurrentState {
    fn from_iter<I: IntoIterator<Item = ExistingConnection>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Current state of one desired connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceState {
    /// Connection exists with the expected kind
    Present,
    /// Connection does not exist
    Absent,
    /// A connection with this name exists but has another kind
    WrongKind { found: ConnectionKind },
}

impl ResourceState {
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present)
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

/// Counts of step outcomes in an execution record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteSummary {
    pub applied: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Steps of the plan that were never attempted because an earlier one failed
    pub not_attempted: usize,
}

impl ExecuteSummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.applied
    }

    /// Check if execution was fully successful (no failures)
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Total number of steps accounted for
    pub fn total(&self) -> usize {
        self.applied + self.unchanged + self.skipped + self.failed + self.not_attempted
    }
}

/// Output from an external command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub success: bool,
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: output.stdout,
            stderr: output.stderr,
            success: output.status.success(),
        }
    }
}

impl CommandOutput {
    /// Get stdout as a string
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Get stderr as a string
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_kind_from_nmcli() {
        assert_eq!(ConnectionKind::from_nmcli("bond"), ConnectionKind::Bond);
        assert_eq!(
            ConnectionKind::from_nmcli("802-3-ethernet"),
            ConnectionKind::Ethernet
        );
        assert_eq!(
            ConnectionKind::from_nmcli("wifi"),
            ConnectionKind::Other("wifi".into())
        );
    }

    #[test]
    fn test_current_state_lookup() {
        let state: CurrentState = [
            ExistingConnection::new("bond0", ConnectionKind::Bond),
            ExistingConnection::new("eth0", ConnectionKind::Ethernet),
        ]
        .into_iter()
        .collect();

        assert!(state.contains("bond0"));
        assert!(!state.contains("bond1"));
        assert_eq!(state.get("eth0").unwrap().kind, ConnectionKind::Ethernet);
    }

    #[test]
    fn test_summary_totals() {
        let summary = ExecuteSummary {
            applied: 3,
            unchanged: 1,
            skipped: 0,
            failed: 1,
            not_attempted: 4,
        };
        assert_eq!(summary.total(), 9);
        assert_eq!(summary.total_changes(), 3);
        assert!(!summary.is_success());
    }
}

//! Error types for network deployment.
//!
//! Errors are categorized so the controller and CLI can tell a rejected
//! input (nothing touched) from a failure that left the host in a changed
//! state, and so `nmcli` output can be mapped onto idempotent outcomes.

use std::path::PathBuf;
use thiserror::Error;

/// Categories of deployment errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Input rejected before any mutation
    Input,
    /// A host-facing operation failed
    Apply,
    /// The host did not answer after reconfiguration
    Connectivity,
    /// The rescue interface could not be brought up
    Rescue,
    /// Snapshot capture, storage or lookup
    Backup,
    /// The connection being operated on does not exist
    NotFound,
    /// The connection being created already exists
    AlreadyExists,
    /// Permission denied (usually not running as root)
    Permission,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether the host may have been left in a changed state.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Apply | Self::Rescue)
    }

    /// Whether the error means the desired end state already holds.
    ///
    /// Deleting something absent and creating something present are both
    /// success for an idempotent step.
    pub fn is_ignorable(&self) -> bool {
        matches!(self, Self::NotFound | Self::AlreadyExists)
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Input => "Fix the topology configuration and run again",
            Self::Apply => "Inspect the execution record and run `hostnet rollback` if needed",
            Self::Connectivity => "Check switch port VLAN/trunk settings for the management plane",
            Self::Rescue => "Console access is required to restore management connectivity",
            Self::Backup => "Check the backup directory and free space",
            Self::NotFound => "No action needed - the connection does not exist",
            Self::AlreadyExists => "No action needed - the connection already exists",
            Self::Permission => "Run as root",
            Self::Other => "Check the error details for more information",
        }
    }
}

/// Errors that can occur while compiling, applying or recovering a topology.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed topology; fails before any mutation
    #[error("invalid topology: {reason}")]
    InvalidTopology {
        /// What is wrong with the input
        reason: String,
    },

    /// Name collision or ordering violation found while compiling a plan
    #[error("compile error: {reason}")]
    Compile {
        /// Description of the violation
        reason: String,
    },

    /// A single host-facing operation failed; remaining steps were not run
    #[error("step failed: {step}: {cause}")]
    ApplyStepFailed {
        /// Identity of the failing step
        step: String,
        /// Failure reported by the backend
        cause: String,
    },

    /// The reachability oracle gave a negative verdict
    #[error("{target} unreachable after deployment: {detail}")]
    VerificationFailed {
        /// Address that was probed
        target: String,
        /// Last probe error
        detail: String,
    },

    /// The rescue interface could not be brought up
    #[error("rescue failed: {step}: {cause}")]
    RollbackFailed {
        /// Identity of the failing rescue step
        step: String,
        /// Failure reported by the backend
        cause: String,
    },

    /// Restore requested but the store holds no snapshots
    #[error("no backup available")]
    NoBackupAvailable,

    /// Snapshot capture or save failed
    #[error("snapshot failed: {reason}")]
    SnapshotFailed {
        /// Why the snapshot could not be taken
        reason: String,
    },

    /// Snapshot id not present in the store
    #[error("snapshot not found: {id}")]
    SnapshotNotFound {
        /// Requested snapshot id
        id: String,
    },

    /// The state machine was driven with an undefined trigger
    #[error("invalid transition: {trigger} in phase {phase}")]
    InvalidTransition {
        /// Phase the machine was in
        phase: String,
        /// Trigger that has no transition from that phase
        trigger: String,
    },

    /// Connection referenced by an operation does not exist
    #[error("connection not found: {name}")]
    ConnectionNotFound {
        /// Connection name
        name: String,
    },

    /// Connection to be created already exists
    #[error("connection already exists: {name}")]
    ConnectionExists {
        /// Connection name
        name: String,
    },

    /// Permission denied by the host
    #[error("permission denied: {message}")]
    Permission {
        /// Details about what was denied
        message: String,
    },

    /// External command failed
    #[error("command failed: {command}: {stderr}")]
    CommandFailed {
        /// Command line that was run
        command: String,
        /// Standard error output from the failed command
        stderr: String,
    },

    /// Snapshot archive could not be packed or unpacked
    #[error("archive error: {message}")]
    Archive {
        /// Description of the problem
        message: String,
    },

    /// Text could not be parsed (addresses, command output, metadata)
    #[error("parse error: {message}")]
    Parse {
        /// Description of the problem
        message: String,
    },

    /// Snapshot metadata file is unreadable
    #[error("invalid snapshot metadata at {path}: {message}")]
    Metadata {
        /// Metadata file
        path: PathBuf,
        /// Deserializer message
        message: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidTopology { .. } | Error::Compile { .. } => ErrorCategory::Input,
            Error::ApplyStepFailed { .. } | Error::CommandFailed { .. } => ErrorCategory::Apply,
            Error::VerificationFailed { .. } => ErrorCategory::Connectivity,
            Error::RollbackFailed { .. } => ErrorCategory::Rescue,
            Error::NoBackupAvailable
            | Error::SnapshotFailed { .. }
            | Error::SnapshotNotFound { .. }
            | Error::Archive { .. }
            | Error::Metadata { .. } => ErrorCategory::Backup,
            Error::ConnectionNotFound { .. } => ErrorCategory::NotFound,
            Error::ConnectionExists { .. } => ErrorCategory::AlreadyExists,
            Error::Permission { .. } => ErrorCategory::Permission,
            _ => ErrorCategory::Other,
        }
    }

    /// Whether the error means the desired end state already holds.
    pub fn is_ignorable(&self) -> bool {
        self.category().is_ignorable()
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Error::InvalidTopology {
            reason: reason.into(),
        }
    }

    pub(crate) fn compile(reason: impl Into<String>) -> Self {
        Error::Compile {
            reason: reason.into(),
        }
    }

    /// Create an error from `nmcli` output.
    ///
    /// Analyzes stderr so that idempotent steps can treat "already gone" and
    /// "already there" as success.
    pub fn from_nmcli_output(command: &str, stderr: &str, connection: Option<&str>) -> Self {
        let stderr_lower = stderr.to_lowercase();
        let name = connection.unwrap_or("unknown").to_string();

        if stderr_lower.contains("unknown connection")
            || stderr_lower.contains("no such connection")
            || stderr_lower.contains("cannot delete unknown connection")
            || stderr_lower.contains("not found")
        {
            return Error::ConnectionNotFound { name };
        }

        if stderr_lower.contains("already exists") {
            return Error::ConnectionExists { name };
        }

        if stderr_lower.contains("insufficient privileges")
            || stderr_lower.contains("not authorized")
            || stderr_lower.contains("permission denied")
        {
            return Error::Permission {
                message: stderr.trim().to_string(),
            };
        }

        Error::CommandFailed {
            command: command.to_string(),
            stderr: stderr.trim().to_string(),
        }
    }
}

/// Result type for deployment operations.
pub type Result<T> = std::result::Result<T, Error>;

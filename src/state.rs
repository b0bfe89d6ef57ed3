use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use netdeploy::{DeployReport, DeployResult, RestoreResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::paths;

// ============================================================================
// State Structures
// ============================================================================

/// What hostnet remembers between runs
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HostnetState {
    /// Most recent live deployment
    #[serde(default)]
    pub last_deploy: Option<DeployState>,

    /// Most recent snapshot restore
    #[serde(default)]
    pub last_restore: Option<RestoreState>,

    /// The rescue connection replaced the management bridge and nothing
    /// has restored or redeployed since
    #[serde(default)]
    pub rescue_active: bool,

    /// Last time the state was updated
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DeployOutcome {
    Committed,
    Failed,
    RolledBack,
    RescueFailed,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DeployState {
    pub at: DateTime<Utc>,
    pub outcome: DeployOutcome,
    /// Snapshot taken before the change, if any
    pub snapshot: Option<String>,
    pub steps_applied: usize,
    /// Error text for anything but a commit
    pub detail: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RestoreState {
    pub at: DateTime<Utc>,
    pub snapshot: String,
    pub success: bool,
}

// ============================================================================
// HostnetState Implementation
// ============================================================================

impl HostnetState {
    /// Load state from `<state_dir>/state.toml`, or default if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::state_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("State file does not exist, using default state");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read state file: {}", path.display()))?;
        let state: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", path.display()))?;

        log::debug!("Loaded state from {}", path.display());
        Ok(state)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&paths::state_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).with_context(|| {
                format!("Failed to create state directory: {}", dir.display())
            })?;
        }

        let content = toml::to_string_pretty(&self).context("Failed to serialize state to TOML")?;
        fs::write(path, &content)
            .with_context(|| format!("Failed to write state file: {}", path.display()))?;

        log::debug!("Saved state to {}", path.display());
        Ok(())
    }

    /// Record a live deployment. Previews are not recorded.
    pub fn record_deploy(&mut self, report: &DeployReport) {
        if report.dry_run {
            return;
        }
        let (outcome, detail) = match &report.result {
            DeployResult::Success => (DeployOutcome::Committed, None),
            DeployResult::Failed { cause } => (DeployOutcome::Failed, Some(cause.to_string())),
            DeployResult::RolledBack {
                cause,
                rescue_error: None,
            } => (DeployOutcome::RolledBack, Some(cause.to_string())),
            DeployResult::RolledBack {
                cause,
                rescue_error: Some(rescue),
            } => (
                DeployOutcome::RescueFailed,
                Some(format!("{cause}; {rescue}")),
            ),
        };

        self.rescue_active = outcome == DeployOutcome::RolledBack;
        self.last_deploy = Some(DeployState {
            at: Utc::now(),
            outcome,
            snapshot: report.snapshot_id.as_ref().map(ToString::to_string),
            steps_applied: report.summary.applied,
            detail,
        });
        self.last_updated = Utc::now();
    }

    /// Record a snapshot restore
    pub fn record_restore(&mut self, result: &RestoreResult) {
        let success = result.is_success();
        if success {
            self.rescue_active = false;
        }
        self.last_restore = Some(RestoreState {
            at: Utc::now(),
            snapshot: result.snapshot_id.to_string(),
            success,
        });
        self.last_updated = Utc::now();
    }
}

impl Default for HostnetState {
    fn default() -> Self {
        Self {
            last_deploy: None,
            last_restore: None,
            rescue_active: false,
            last_updated: Utc::now(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

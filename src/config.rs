//! `hostnet.toml` loading
//!
//! ```toml
//! [deploy]
//! retention = 5
//! pre_apply_delay = 5
//! failure_policy = "leave-for-operator"
//!
//! [deploy.probe]
//! attempts = 3
//! timeout = 2
//! settle = 20
//!
//! [agent]
//! properties = "/etc/cloudstack/agent/agent.properties"
//!
//! [[planes]]
//! name = "management"
//! bond = "bond1"
//! slaves = ["eth2", "eth3"]
//! bridge = "cloudbr1"
//! mode = "tagged"
//! vlan = 41
//! ip = "10.1.41.10/24"
//! gateway = "10.1.41.1"
//! ```
//!
//! A `.json` file with the same shape is accepted too.

use crate::paths;
use anyhow::{Context, Result, bail};
use netdeploy::{
    ApplyFailurePolicy, DEFAULT_RETENTION, DeployOptions, NetworkPlane, PlaneName, ProbeOptions,
    Topology,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_AGENT_PROPERTIES: &str = "/etc/cloudstack/agent/agent.properties";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostnetConfig {
    #[serde(default)]
    pub deploy: DeployConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub planes: Vec<NetworkPlane>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeployConfig {
    /// Snapshots kept in the backup store
    pub retention: usize,
    /// Seconds between taking the snapshot and the first change
    pub pre_apply_delay: u64,
    pub failure_policy: ApplyFailurePolicy,
    /// Address to verify instead of the topology's gateway
    pub probe_target: Option<IpAddr>,
    /// Snapshot directory; defaults to `<state_dir>/backups`
    pub backup_dir: Option<String>,
    /// NetworkManager keyfile directory
    pub keyfile_dir: Option<String>,
    pub probe: ProbeOptions,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            pre_apply_delay: 5,
            failure_policy: ApplyFailurePolicy::default(),
            probe_target: None,
            backup_dir: None,
            keyfile_dir: None,
            probe: ProbeOptions::default(),
        }
    }
}

/// The management agent's properties file and which keys name which bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    pub enabled: bool,
    pub properties: String,
    /// Property key -> plane whose bridge it should name
    pub devices: BTreeMap<String, PlaneName>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let devices = [
            ("private.network.device", PlaneName::Management),
            ("guest.network.device", PlaneName::Storage),
            ("public.network.device", PlaneName::Public),
        ]
        .into_iter()
        .map(|(key, plane)| (key.to_string(), plane))
        .collect();
        Self {
            enabled: true,
            properties: DEFAULT_AGENT_PROPERTIES.to_string(),
            devices,
        }
    }
}

impl AgentConfig {
    pub fn properties_path(&self) -> PathBuf {
        paths::expand(&self.properties)
    }
}

impl HostnetConfig {
    /// Load from an explicit path, or `<config_dir>/hostnet.toml`
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => paths::config_file()?,
        };
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Could not read config {}", path.display()))?;
        let config = Self::parse(&content, &path)?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse by file extension: `.json` or TOML otherwise
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            serde_json::from_str(content)
                .with_context(|| format!("Invalid JSON in {}", path.display()))
        } else {
            toml::from_str(content).with_context(|| format!("Invalid TOML in {}", path.display()))
        }
    }

    /// The validated target topology
    pub fn topology(&self) -> Result<Topology> {
        if self.planes.is_empty() {
            bail!("No [[planes]] configured");
        }
        Topology::validated(self.planes.clone()).context("Invalid network topology")
    }

    pub fn deploy_options(&self, dry_run: bool, undo_on_failure: bool) -> DeployOptions {
        let failure_policy = if undo_on_failure {
            ApplyFailurePolicy::UndoApplied
        } else {
            self.deploy.failure_policy
        };
        DeployOptions {
            dry_run,
            probe: self.deploy.probe,
            pre_apply_delay: Duration::from_secs(self.deploy.pre_apply_delay),
            failure_policy,
            probe_target: self.deploy.probe_target,
        }
    }

    pub fn backup_dir(&self) -> Result<PathBuf> {
        match &self.deploy.backup_dir {
            Some(dir) => Ok(paths::expand(dir)),
            None => paths::backup_dir(),
        }
    }

    pub fn keyfile_dir(&self) -> Option<PathBuf> {
        self.deploy.keyfile_dir.as_deref().map(paths::expand)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SCENARIO: &str = r#"
[deploy]
retention = 3
pre_apply_delay = 0

[deploy.probe]
attempts = 5

[[planes]]
name = "storage"
bond = "bond0"
slaves = ["eth0", "eth1"]
bridge = "cloudbr0"
mode = "untagged"
mtu = 9000

[[planes]]
name = "management"
bond = "bond1"
slaves = ["eth2", "eth3"]
bridge = "cloudbr1"
mode = "tagged"
vlan = 41
ip = "10.1.41.10/24"
gateway = "10.1.41.1"
dns = ["10.1.41.2"]
"#;

    #[test]
    fn test_parse_scenario() {
        let config = HostnetConfig::parse(SCENARIO, Path::new("hostnet.toml")).unwrap();
        assert_eq!(config.deploy.retention, 3);
        assert_eq!(config.deploy.probe.attempts, 5);
        assert_eq!(config.deploy.probe.timeout, Duration::from_secs(2));

        let topology = config.topology().unwrap();
        assert_eq!(topology.planes().len(), 2);
        assert_eq!(topology.default_gateway(), Some("10.1.41.1".parse().unwrap()));
        assert!(config.agent.enabled);
        assert_eq!(
            config.agent.devices.get("private.network.device"),
            Some(&PlaneName::Management)
        );
    }

    #[test]
    fn test_deploy_options() {
        let config = HostnetConfig::parse(SCENARIO, Path::new("hostnet.toml")).unwrap();
        let options = config.deploy_options(false, false);
        assert_eq!(options.pre_apply_delay, Duration::ZERO);
        assert_eq!(options.failure_policy, ApplyFailurePolicy::LeaveForOperator);

        let options = config.deploy_options(true, true);
        assert!(options.dry_run);
        assert_eq!(options.failure_policy, ApplyFailurePolicy::UndoApplied);
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{
            "planes": [{
                "name": "management",
                "bond": "bond1",
                "slaves": ["eth2"],
                "bridge": "cloudbr1",
                "mode": "untagged",
                "gateway": "192.168.1.1"
            }]
        }"#;
        let config = HostnetConfig::parse(json, Path::new("hostnet.json")).unwrap();
        assert_eq!(config.planes[0].mtu, 1500);
        assert!(config.topology().is_ok());
    }

    #[test]
    fn test_invalid_topology_is_rejected() {
        let broken = SCENARIO.replace("vlan = 41\n", "");
        let config = HostnetConfig::parse(&broken, Path::new("hostnet.toml")).unwrap();
        let err = config.topology().unwrap_err();
        assert!(format!("{err:#}").contains("tagged"));
    }

    #[test]
    fn test_unknown_keys_are_errors() {
        let err = HostnetConfig::parse("[deploy]\nretnetion = 2\n", Path::new("h.toml"));
        assert!(err.is_err());
    }

    #[test]
    fn test_no_planes() {
        let config = HostnetConfig::parse("", Path::new("hostnet.toml")).unwrap();
        assert!(config.topology().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("hostnet.toml");
        fs::write(&path, SCENARIO).unwrap();
        let config = HostnetConfig::load(Some(&path)).unwrap();
        assert_eq!(config.planes.len(), 2);
        assert!(HostnetConfig::load(Some(&temp.path().join("missing.toml"))).is_err());
    }
}

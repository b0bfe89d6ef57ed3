//! Point the management agent at the deployed bridges
//!
//! Rewrites `key=value` lines of the agent's properties file. Other lines,
//! comments and ordering are kept; missing keys are appended.

use crate::config::AgentConfig;
use anyhow::{Context, Result};
use chrono::Utc;
use colored::Colorize;
use netdeploy::Topology;
use similar::{ChangeTag, TextDiff};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum AgentUpdate {
    /// No properties file on this host
    Missing,
    Unchanged,
    Updated { backup: PathBuf, before: String, after: String },
}

/// Property values the topology implies, for planes it defines
pub fn desired(agent: &AgentConfig, topology: &Topology) -> BTreeMap<String, String> {
    agent
        .devices
        .iter()
        .filter_map(|(key, plane)| {
            topology
                .plane(*plane)
                .map(|p| (key.clone(), p.bridge.clone()))
        })
        .collect()
}

/// Apply `updates` to properties text
pub fn render(content: &str, updates: &BTreeMap<String, String>) -> String {
    let mut pending: BTreeMap<&str, &str> = updates
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    let mut out = String::with_capacity(content.len());

    for line in content.lines() {
        let key = line
            .split_once('=')
            .map(|(k, _)| k.trim())
            .filter(|k| !k.starts_with('#'));
        match key.and_then(|k| pending.remove_entry(k)) {
            Some((key, value)) => out.push_str(&format!("{key}={value}")),
            None => out.push_str(line),
        }
        out.push('\n');
    }
    for (key, value) in pending {
        out.push_str(&format!("{key}={value}\n"));
    }
    out
}

/// Rewrite the properties file, keeping a timestamped backup of the old one
pub fn update(path: &Path, updates: &BTreeMap<String, String>) -> Result<AgentUpdate> {
    if !path.exists() {
        return Ok(AgentUpdate::Missing);
    }
    let before = fs::read_to_string(path)
        .with_context(|| format!("Could not read {}", path.display()))?;
    let after = render(&before, updates);
    if after == before {
        return Ok(AgentUpdate::Unchanged);
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "agent.properties".to_string());
    let stamp = Utc::now().format("%Y%m%dT%H%M%S");
    let backup = path.with_file_name(format!("{file_name}.{stamp}.bak"));
    fs::copy(path, &backup)
        .with_context(|| format!("Could not back up {}", path.display()))?;
    fs::write(path, &after).with_context(|| format!("Could not write {}", path.display()))?;
    log::info!("Updated {} (backup {})", path.display(), backup.display());

    Ok(AgentUpdate::Updated {
        backup,
        before,
        after,
    })
}

/// Print changed lines, `similar` style
pub fn show_diff(before: &str, after: &str) {
    let diff = TextDiff::from_lines(before, after);
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Delete => print!("    {}", format!("- {change}").red()),
            ChangeTag::Insert => print!("    {}", format!("+ {change}").green()),
            ChangeTag::Equal => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netdeploy::{NetworkPlane, PlaneName};
    use tempfile::TempDir;

    fn updates() -> BTreeMap<String, String> {
        [
            ("private.network.device", "cloudbr1"),
            ("guest.network.device", "cloudbr0"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_render_replaces_and_appends() {
        let before = "# agent\nprivate.network.device=cloudbr9\nhost=10.1.41.5\n";
        let after = render(before, &updates());
        assert_eq!(
            after,
            "# agent\nprivate.network.device=cloudbr1\nhost=10.1.41.5\nguest.network.device=cloudbr0\n"
        );
    }

    #[test]
    fn test_render_ignores_comments() {
        let before = "#private.network.device=cloudbr9\n";
        let after = render(before, &updates());
        assert!(after.starts_with("#private.network.device=cloudbr9\n"));
        assert!(after.contains("\nprivate.network.device=cloudbr1\n"));
    }

    #[test]
    fn test_desired_skips_absent_planes() {
        let management =
            NetworkPlane::untagged(PlaneName::Management, "bond1", &["eth2"], "cloudbr1", 1500)
                .with_gateway("10.1.41.1".parse().unwrap());
        let topology = Topology::new(vec![management]);
        let values = desired(&AgentConfig::default(), &topology);
        assert_eq!(values.len(), 1);
        assert_eq!(values["private.network.device"], "cloudbr1");
    }

    #[test]
    fn test_update_writes_backup() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("agent.properties");
        fs::write(&path, "private.network.device=cloudbr9\n").unwrap();

        let AgentUpdate::Updated { backup, before, .. } = update(&path, &updates()).unwrap() else {
            panic!("expected update");
        };
        assert_eq!(fs::read_to_string(&backup).unwrap(), before);
        assert!(
            backup
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("agent.properties.")
        );
        assert!(fs::read_to_string(&path).unwrap().contains("cloudbr1"));

        assert!(matches!(
            update(&path, &updates()).unwrap(),
            AgentUpdate::Unchanged
        ));
    }

    #[test]
    fn test_missing_file() {
        let temp = TempDir::new().unwrap();
        let result = update(&temp.path().join("agent.properties"), &updates()).unwrap();
        assert!(matches!(result, AgentUpdate::Missing));
    }
}

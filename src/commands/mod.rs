pub mod backup;
pub mod deploy;
pub mod health;
pub mod rollback;
pub mod status;

use crate::config::HostnetConfig;
use crate::lock::RunLock;
use crate::paths;
use anyhow::{Context as _, Result, bail};
use colored::Colorize;
use netdeploy::plan::Reversal;
use netdeploy::{DirBackupStore, NmcliBackend, Phase, Plan, SnapshotId};

/// The `nmcli` backend configured from `[deploy]`
fn backend(config: &HostnetConfig) -> NmcliBackend {
    let mut host = NmcliBackend::new();
    if let Some(dir) = config.keyfile_dir() {
        host = host.keyfile_dir(dir);
    }
    let agent = config
        .agent
        .enabled
        .then(|| config.agent.properties_path());
    host.agent_properties(agent)
}

fn store(config: &HostnetConfig) -> Result<DirBackupStore> {
    let dir = config.backup_dir()?;
    DirBackupStore::open(&dir, config.deploy.retention)
        .with_context(|| format!("Could not open backup store {}", dir.display()))
}

fn parse_id(raw: &str) -> Result<SnapshotId> {
    SnapshotId::parse(raw).with_context(|| format!("Invalid snapshot id '{raw}'"))
}

/// Refuse to touch the network without root
fn require_root(action: &str) -> Result<()> {
    if !paths::is_root() {
        bail!("{action} changes system networking and must run as root");
    }
    Ok(())
}

fn lock() -> Result<RunLock> {
    Ok(RunLock::acquire(&paths::lock_file()?)?)
}

fn confirm(prompt: &str) -> Result<bool> {
    use dialoguer::Confirm;

    let confirmed = Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?;

    Ok(confirmed)
}

/// Print a plan grouped by phase
fn print_plan(plan: &Plan, verbose: u8) {
    if plan.is_empty() {
        println!("  {}", "Nothing to do".dimmed());
        return;
    }
    for (phase, steps) in [(Phase::Cleanup, plan.cleanup()), (Phase::Build, plan.build())] {
        if steps.is_empty() {
            continue;
        }
        println!();
        println!("  {} ({})", format!("{phase:?}").cyan().bold(), steps.len());
        for (i, step) in steps.iter().enumerate() {
            let plane = step
                .plane
                .map_or_else(|| "-".to_string(), |p| p.to_string());
            let marker = if step.kind.is_delete() {
                "-".red()
            } else {
                "+".green()
            };
            println!(
                "    {} {} {:<10} {}",
                format!("{:>2}.", i + 1).dimmed(),
                marker,
                plane.dimmed(),
                step.kind
            );
            if verbose > 0 {
                let undo = match &step.reverse {
                    Reversal::Step(kind) => kind.to_string(),
                    Reversal::RequiresSnapshot => "restore a snapshot".to_string(),
                };
                println!("          {}", format!("undo: {undo}").dimmed());
            }
        }
    }
}

use anyhow::Result;
use colored::Colorize;
use netdeploy::BackupStore;

use super::store;
use crate::state::{DeployOutcome, HostnetState};
use crate::{Context, Severity, paths, ui};

pub fn run(ctx: &Context) -> Result<Severity> {
    let state = HostnetState::load()?;

    ui::header("hostnet status");

    ui::section("Last deployment");
    match &state.last_deploy {
        Some(deploy) => {
            let outcome = match deploy.outcome {
                DeployOutcome::Committed => "committed".green(),
                DeployOutcome::Failed => "failed".yellow(),
                DeployOutcome::RolledBack => "rolled back to rescue".yellow(),
                DeployOutcome::RescueFailed => "rescue failed".red().bold(),
            };
            ui::kv("Outcome", &outcome.to_string());
            ui::kv("When", &deploy.at.to_rfc3339());
            ui::kv("Steps applied", &deploy.steps_applied.to_string());
            if let Some(id) = &deploy.snapshot {
                ui::kv("Snapshot", id);
            }
            if let Some(detail) = &deploy.detail {
                ui::dim(detail);
            }
        }
        None => ui::dim("No deployment recorded"),
    }

    if let Some(restore) = &state.last_restore {
        ui::section("Last restore");
        ui::kv("Snapshot", &restore.snapshot);
        ui::kv("When", &restore.at.to_rfc3339());
        let result = if restore.success {
            "succeeded".green()
        } else {
            "incomplete".yellow()
        };
        ui::kv("Result", &result.to_string());
    }

    if state.rescue_active {
        println!();
        ui::warn("Rescue connection active; management runs without its bridge");
    }

    ui::section("Backups");
    match ctx.config().and_then(|config| store(&config)) {
        Ok(store) => match store.list() {
            Ok(snapshots) => {
                ui::kv("Stored", &snapshots.len().to_string());
                if let Some(latest) = snapshots.first() {
                    ui::kv("Latest", latest.id.as_str());
                }
            }
            Err(e) => ui::warn(&format!("Could not list snapshots: {e}")),
        },
        Err(e) => ui::dim(&format!("Unavailable: {e:#}")),
    }

    if let Ok(lock) = paths::lock_file()
        && lock.exists()
    {
        println!();
        ui::info(&format!("A run holds {}", lock.display()));
    }

    println!();
    Ok(Severity::Ok)
}

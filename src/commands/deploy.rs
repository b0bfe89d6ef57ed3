use anyhow::{Context as _, Result};
use colored::Colorize;
use netdeploy::{
    DeployReport, DeployResult, Deployer, ExecutionRecord, PingProber, StateReader, Topology,
};

use super::{backend, confirm, lock, print_plan, require_root, store};
use crate::agent::{self, AgentUpdate};
use crate::cli::DeployArgs;
use crate::config::HostnetConfig;
use crate::progress::BarProgress;
use crate::state::HostnetState;
use crate::{Context, Severity, ui};

pub fn plan(ctx: &Context) -> Result<Severity> {
    let config = ctx.config()?;
    let topology = config.topology()?;
    let host = backend(&config);
    let current = host
        .current_state()
        .context("Could not list existing connections")?;
    let plan = netdeploy::compile(&topology, &current)?;

    ui::header("Deployment plan");
    print_plan(&plan, ctx.verbose);
    println!();
    ui::dim(&format!(
        "{} cleanup, {} build steps across {} planes",
        plan.cleanup().len(),
        plan.build().len(),
        plan.planes().len()
    ));
    Ok(Severity::Ok)
}

pub fn deploy(ctx: &Context, args: &DeployArgs) -> Result<Severity> {
    let config = ctx.config()?;
    let topology = config.topology()?;
    if !args.dry_run {
        require_root("deploy")?;
    }
    let _lock = if args.dry_run { None } else { Some(lock()?) };

    let host = backend(&config);
    let prober = PingProber::new();
    let mut store = store(&config)?;

    let mut confirmed = None;
    if !args.dry_run && !args.yes {
        let current = host.current_state()?;
        let plan = netdeploy::compile(&topology, &current)?;
        ui::header("Deployment plan");
        print_plan(&plan, ctx.verbose);
        println!();
        ui::warn("Connectivity drops while the bridges are rebuilt");
        if !confirm(&format!("Apply {} operations?", plan.len()))? {
            println!();
            println!("  {} Aborted", "✗".red());
            return Ok(Severity::Ok);
        }
        confirmed = Some(plan);
    }

    let options = config.deploy_options(args.dry_run, args.undo_on_failure);
    let mut deployer = Deployer::new(&host, &prober, &mut store)
        .with_options(options)
        .with_observer(BarProgress::new(ctx.quiet));
    let report = match &confirmed {
        Some(plan) => deployer
            .run_confirmed(&topology, plan)
            .context("Plan no longer matches the host; run deploy again to review it")?,
        None => deployer.run_deployment(&topology)?,
    };

    if !report.dry_run {
        let mut state = HostnetState::load().unwrap_or_default();
        state.record_deploy(&report);
        if let Err(e) = state.save() {
            log::warn!("Could not save run state: {e:#}");
        }
    }

    let severity = show_report(&report);
    if report.result.is_success() && !report.dry_run && !args.skip_agent {
        update_agent(&config, &topology);
    }
    Ok(severity)
}

fn show_report(report: &DeployReport) -> Severity {
    if report.dry_run {
        if let Some(record) = &report.record {
            show_record(record);
        }
        println!();
        ui::info(&format!(
            "Dry run - {} operations would run, no changes made",
            report.plan.len()
        ));
        return Severity::Ok;
    }

    println!();
    if let Some(id) = &report.snapshot_id {
        ui::kv("Snapshot", id.as_str());
    } else {
        ui::kv("Snapshot", &"none (capture failed)".yellow().to_string());
    }
    ui::kv(
        "Steps",
        &format!(
            "{} applied, {} unchanged, {} failed, {} not attempted",
            report.summary.applied,
            report.summary.unchanged,
            report.summary.failed,
            report.summary.not_attempted
        ),
    );
    if let Some(verdict) = &report.verdict {
        ui::kv("Gateway", &verdict.describe());
    }

    match &report.result {
        DeployResult::Success => {
            ui::success("Deployment committed");
            Severity::Ok
        }
        DeployResult::Failed { cause } => {
            ui::error(&format!("Deployment failed: {cause}"));
            if let Some(undo) = &report.undo {
                ui::info(&format!(
                    "Undid {} steps created by this run",
                    undo.summary().applied
                ));
                if let Some(failure) = undo.failure() {
                    ui::warn(&format!("Undo stopped at {}: {}", failure.step, failure.outcome));
                }
            }
            match &report.snapshot_id {
                Some(id) => ui::dim(&format!("Restore the previous state: hostnet rollback --id {id}")),
                None => ui::dim("No snapshot was taken; inspect with: hostnet compare"),
            }
            Severity::Warning
        }
        DeployResult::RolledBack {
            cause,
            rescue_error: None,
        } => {
            ui::warn(&format!("{cause}"));
            ui::warn("Management bridge replaced by the rescue connection");
            ui::dim("Storage and public planes were left as deployed");
            ui::dim("Fix the management uplink, then redeploy or run: hostnet rollback");
            Severity::Warning
        }
        DeployResult::RolledBack {
            cause,
            rescue_error: Some(rescue),
        } => {
            ui::error(&format!("{cause}"));
            ui::critical(&format!("{rescue}"));
            ui::critical("Host management may be unreachable; use the console");
            if let Some(record) = report.rescue.as_ref().and_then(|r| r.record.as_ref()) {
                show_record(record);
            }
            Severity::Critical
        }
    }
}

fn show_record(record: &ExecutionRecord) {
    for (i, entry) in record.entries().iter().enumerate() {
        println!(
            "    {} {} {}",
            format!("{:>2}.", i + 1).dimmed(),
            entry.step,
            ui::outcome_badge(&entry.outcome)
        );
    }
}

/// Best effort: a failure here never undoes the deployment
fn update_agent(config: &HostnetConfig, topology: &Topology) {
    if !config.agent.enabled {
        return;
    }
    let path = config.agent.properties_path();
    let values = agent::desired(&config.agent, topology);
    match agent::update(&path, &values) {
        Ok(AgentUpdate::Missing) => {
            log::info!("No agent properties at {}", path.display());
        }
        Ok(AgentUpdate::Unchanged) => {}
        Ok(AgentUpdate::Updated {
            backup,
            before,
            after,
        }) => {
            ui::info(&format!("Updated {}", path.display()));
            agent::show_diff(&before, &after);
            ui::dim(&format!("Previous file saved as {}", backup.display()));
        }
        Err(e) => ui::warn(&format!("Could not update agent properties: {e:#}")),
    }
}

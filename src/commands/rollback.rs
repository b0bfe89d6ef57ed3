use anyhow::Result;
use colored::Colorize;
use netdeploy::{BackupStore, DeployOptions, Deployer, PingProber};

use super::{backend, confirm, lock, parse_id, print_plan, require_root, store};
use crate::cli::RollbackArgs;
use crate::progress::BarProgress;
use crate::state::HostnetState;
use crate::{Context, Severity, ui};

pub fn run(ctx: &Context, args: &RollbackArgs) -> Result<Severity> {
    let config = ctx.config()?;
    if !args.dry_run {
        require_root("rollback")?;
    }
    let _lock = if args.dry_run { None } else { Some(lock()?) };

    let host = backend(&config);
    let prober = PingProber::new();
    let mut store = store(&config)?;

    let id = match &args.id {
        Some(raw) => parse_id(raw)?,
        None => store.latest()?.id,
    };

    if !args.dry_run && !args.yes {
        ui::warn(&format!(
            "Restoring snapshot {id} deletes every bond, bridge and VLAN connection first"
        ));
        if !confirm("Restore?")? {
            println!();
            println!("  {} Aborted", "✗".red());
            return Ok(Severity::Ok);
        }
    }

    let options = DeployOptions {
        dry_run: args.dry_run,
        ..DeployOptions::default()
    };
    let result = Deployer::new(&host, &prober, &mut store)
        .with_options(options)
        .with_observer(BarProgress::new(ctx.quiet))
        .restore(&id)?;

    if args.dry_run {
        ui::header(&format!("Restore plan for {id}"));
        print_plan(&result.plan, ctx.verbose);
        println!();
        ui::info("Dry run - no changes made");
        return Ok(Severity::Ok);
    }

    let mut state = HostnetState::load().unwrap_or_default();
    state.record_restore(&result);
    if let Err(e) = state.save() {
        log::warn!("Could not save run state: {e:#}");
    }

    let summary = result.record.summary();
    if let Some(failure) = result.record.failure() {
        ui::error(&format!(
            "Restore of {id} stopped at {}: {}",
            failure.step, failure.outcome
        ));
        ui::dim(&format!(
            "{} of {} steps applied",
            summary.applied,
            result.plan.len()
        ));
        return Ok(Severity::Warning);
    }

    ui::success(&format!(
        "Restored snapshot {id} ({} applied, {} unchanged)",
        summary.applied, summary.unchanged
    ));
    Ok(Severity::Ok)
}

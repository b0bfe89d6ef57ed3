use anyhow::{Context as _, Result};
use colored::Colorize;
use netdeploy::compare::ConnectionStatus;
use netdeploy::types::ResourceState;
use netdeploy::{ComparisonReport, PingProber, ProbeOptions, StateReader, SystemClock, Verdict};
use std::time::Duration;

use super::backend;
use crate::cli::ProbeArgs;
use crate::state::HostnetState;
use crate::{Context, Severity, ui};

pub fn compare(ctx: &Context) -> Result<Severity> {
    let config = ctx.config()?;
    let topology = config.topology()?;
    let current = backend(&config)
        .current_state()
        .context("Could not list existing connections")?;
    let report = netdeploy::compare(&topology, &current);

    ui::header("Topology comparison");
    show_comparison(&report);
    println!();

    if report.is_converged() {
        ui::success("Host matches the configured topology");
        Ok(Severity::Ok)
    } else {
        let summary = report.summary();
        ui::warn(&format!(
            "Drift: {} missing, {} wrong type, {} unexpected",
            summary.absent, summary.wrong_kind, summary.unexpected
        ));
        Ok(Severity::Warning)
    }
}

pub fn probe(ctx: &Context, args: &ProbeArgs) -> Result<Severity> {
    // A missing config is fine here; fall back to the default probe settings
    let mut options = ctx
        .config()
        .map(|c| c.deploy.probe)
        .unwrap_or_default()
        .without_settle();
    if let Some(attempts) = args.attempts {
        options.attempts = attempts;
    }
    if let Some(timeout) = args.timeout {
        options.timeout = Duration::from_secs(timeout);
    }

    let verdict = run_probe(args.target, &options);
    show_verdict(&verdict);
    Ok(if verdict.reachable {
        Severity::Ok
    } else {
        Severity::Critical
    })
}

/// Gateway reachability plus convergence, as exit codes for monitoring
pub fn health(ctx: &Context) -> Result<Severity> {
    let config = ctx.config()?;
    let topology = config.topology()?;
    let target = config
        .deploy
        .probe_target
        .or_else(|| topology.default_gateway())
        .context("Topology has no default gateway")?;

    ui::header("Network health");

    let verdict = run_probe(target, &config.deploy.probe.without_settle());
    show_verdict(&verdict);

    let mut severity = if verdict.reachable {
        Severity::Ok
    } else {
        Severity::Critical
    };

    match backend(&config).current_state() {
        Ok(current) => {
            let report = netdeploy::compare(&topology, &current);
            let summary = report.summary();
            ui::kv(
                "Connections",
                &format!(
                    "{} present, {} missing, {} wrong type, {} unexpected",
                    summary.present, summary.absent, summary.wrong_kind, summary.unexpected
                ),
            );
            if report.rescue_active {
                ui::warn("Rescue connection is active");
            }
            if !report.is_converged() {
                severity = severity.max(Severity::Warning);
            }
        }
        Err(e) => {
            ui::warn(&format!("Could not read connections: {e}"));
            severity = severity.max(Severity::Warning);
        }
    }

    if let Ok(state) = HostnetState::load()
        && state.rescue_active
    {
        ui::dim("Last deployment rolled back to the rescue connection");
        severity = severity.max(Severity::Warning);
    }

    println!();
    match severity {
        Severity::Ok => ui::success("Healthy"),
        Severity::Warning => ui::warn("Degraded"),
        Severity::Critical => ui::critical("Gateway unreachable"),
    }
    Ok(severity)
}

fn run_probe(target: std::net::IpAddr, options: &ProbeOptions) -> Verdict {
    netdeploy::probe(&PingProber::new(), &SystemClock, target, options)
}

fn show_verdict(verdict: &Verdict) {
    let state = if verdict.reachable {
        "reachable".green()
    } else {
        "unreachable".red().bold()
    };
    ui::kv("Target", &format!("{} {state}", verdict.target));
    if let Some(latency) = verdict.latency() {
        ui::kv("Latency", &ui::format_duration(latency));
    }
    ui::kv(
        "Attempts",
        &format!(
            "{} in {}",
            verdict.attempts,
            ui::format_duration(verdict.elapsed)
        ),
    );
    if !verdict.reachable {
        ui::dim(&verdict.describe());
    }
}

fn show_comparison(report: &ComparisonReport) {
    for plane in &report.planes {
        let mark = if plane.is_converged() {
            "✓".green()
        } else {
            "✗".red()
        };
        ui::section(&format!("{mark} {}", plane.plane));
        for status in &plane.connections {
            println!("    {}", connection_line(status));
        }
    }

    if !report.unexpected.is_empty() {
        ui::section("Unexpected connections");
        for conn in &report.unexpected {
            let device = conn.device.as_deref().unwrap_or("-");
            println!(
                "    {} {} ({}, {})",
                "?".yellow(),
                conn.name,
                conn.kind,
                device.dimmed()
            );
        }
    }
    if report.rescue_active {
        println!();
        ui::warn("Rescue connection is defined");
    }
}

fn connection_line(status: &ConnectionStatus) -> String {
    match &status.state {
        ResourceState::Present => format!("{} {}", "✓".green(), status.name),
        ResourceState::Absent => format!(
            "{} {} {}",
            "✗".red(),
            status.name,
            format!("missing {}", status.expected).dimmed()
        ),
        ResourceState::WrongKind { found } => format!(
            "{} {} {}",
            "⚠".yellow(),
            status.name,
            format!("is {found}, expected {}", status.expected).dimmed()
        ),
    }
}

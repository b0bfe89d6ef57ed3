use anyhow::Result;
use colored::Colorize;
use netdeploy::{BackupStore, Deployer, PingProber};

use super::{backend, lock, parse_id, store};
use crate::{Context, Severity, ui};

pub fn save(ctx: &Context) -> Result<Severity> {
    let config = ctx.config()?;
    let _lock = lock()?;
    let host = backend(&config);
    let prober = PingProber::new();
    let mut store = store(&config)?;

    let id = Deployer::new(&host, &prober, &mut store).snapshot()?;
    ui::success(&format!("Saved snapshot {id}"));
    Ok(Severity::Ok)
}

pub fn list(ctx: &Context) -> Result<Severity> {
    let config = ctx.config()?;
    let store = store(&config)?;
    let snapshots = store.list()?;

    ui::header("Snapshots");
    if snapshots.is_empty() {
        ui::dim("No snapshots stored");
        ui::dim("Run: hostnet backup save");
        return Ok(Severity::Ok);
    }
    for (i, meta) in snapshots.iter().enumerate() {
        let latest = if i == 0 {
            " latest".green().to_string()
        } else {
            String::new()
        };
        println!(
            "  {}  {}  {:>9}{latest}",
            meta.id.as_str().bold(),
            meta.created_at.format("%Y-%m-%d %H:%M:%S UTC").to_string().dimmed(),
            ui::format_size(meta.size)
        );
    }
    println!();
    ui::dim(&format!(
        "{} stored, keeping {}",
        snapshots.len(),
        config.deploy.retention
    ));
    Ok(Severity::Ok)
}

pub fn show(ctx: &Context, id: Option<&str>) -> Result<Severity> {
    let config = ctx.config()?;
    let store = store(&config)?;
    let snapshot = match id {
        Some(raw) => store.get(&parse_id(raw)?)?,
        None => store.latest()?,
    };
    let contents = snapshot.contents()?;

    ui::header(&format!("Snapshot {}", snapshot.id));
    ui::kv("Created", &snapshot.created_at.to_rfc3339());
    ui::kv("Checksum", &snapshot.checksum);
    ui::kv("Size", &ui::format_size(snapshot.archive.len() as u64));

    ui::section(&format!("Connections ({})", contents.connections.len()));
    for conn in &contents.connections {
        println!("    {} {}", conn.name, conn.file_name.dimmed());
    }

    if !contents.interfaces.trim().is_empty() {
        ui::section("Interfaces");
        for line in contents.interfaces.lines() {
            ui::dim(line);
        }
    }
    if contents.agent_properties.is_some() {
        println!();
        ui::kv("Agent properties", "included");
    }
    Ok(Severity::Ok)
}

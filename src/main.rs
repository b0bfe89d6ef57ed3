mod agent;
mod cli;
mod commands;
mod config;
mod lock;
mod paths;
mod progress;
mod state;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{BackupCommand, Cli, Command};
use config::HostnetConfig;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub config_path: Option<PathBuf>,
}

impl Context {
    pub fn config(&self) -> Result<HostnetConfig> {
        HostnetConfig::load(self.config_path.as_deref())
    }
}

/// How a command went, mapped onto the process exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Success, nothing to report
    Ok,
    /// Recoverable: deploy failed or rolled back, drift detected
    Warning,
    /// Management may be unreachable
    Critical,
}

impl From<Severity> for ExitCode {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Ok => Self::SUCCESS,
            Severity::Warning => Self::from(1),
            Severity::Critical => Self::from(2),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        config_path: cli.config,
    };

    match run(&ctx, cli.command) {
        Ok(severity) => severity.into(),
        Err(e) => {
            ui::error(&format!("{e:#}"));
            ExitCode::from(1)
        }
    }
}

fn run(ctx: &Context, command: Command) -> Result<Severity> {
    match command {
        Command::Plan => commands::deploy::plan(ctx),
        Command::Deploy(args) => commands::deploy::deploy(ctx, &args),
        Command::Rollback(args) => commands::rollback::run(ctx, &args),
        Command::Compare => commands::health::compare(ctx),
        Command::Probe(args) => commands::health::probe(ctx, &args),
        Command::Health => commands::health::health(ctx),
        Command::Backup(cmd) => match cmd {
            BackupCommand::Save => commands::backup::save(ctx),
            BackupCommand::List => commands::backup::list(ctx),
            BackupCommand::Show { id } => commands::backup::show(ctx, id.as_deref()),
        },
        Command::Status => commands::status::run(ctx),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "hostnet", &mut io::stdout());
            Ok(Severity::Ok)
        }
    }
}

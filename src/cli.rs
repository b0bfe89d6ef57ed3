use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hostnet")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(
    about = "Deploy bonded, VLAN-aware host networking with automatic rescue",
    long_about = None
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: <config dir>/hostnet.toml)
    #[arg(short, long, global = true, env = "HOSTNET_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show the operations a deployment would run
    Plan,

    /// Back up, apply, verify, and roll back on lost connectivity
    Deploy(DeployArgs),

    /// Restore a saved snapshot
    Rollback(RollbackArgs),

    /// Compare the host against the configured topology
    Compare,

    /// Probe an address the way deployments verify the gateway
    Probe(ProbeArgs),

    /// Check gateway reachability and topology convergence
    Health,

    /// Manage network snapshots
    #[command(subcommand)]
    Backup(BackupCommand),

    /// Show the outcome of the last runs
    Status,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser)]
pub struct DeployArgs {
    /// Preview only - compile and show the plan
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Delete what a failed run created before exiting
    #[arg(long)]
    pub undo_on_failure: bool,

    /// Don't update the agent properties file after a commit
    #[arg(long)]
    pub skip_agent: bool,
}

#[derive(Parser)]
pub struct RollbackArgs {
    /// Snapshot to restore (default: latest)
    #[arg(long)]
    pub id: Option<String>,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Show the restore plan without applying it
    #[arg(short = 'n', long)]
    pub dry_run: bool,
}

#[derive(Parser)]
pub struct ProbeArgs {
    /// Address to probe
    pub target: IpAddr,

    /// Number of attempts
    #[arg(short, long)]
    pub attempts: Option<u32>,

    /// Seconds per attempt
    #[arg(short, long)]
    pub timeout: Option<u64>,
}

#[derive(Subcommand)]
pub enum BackupCommand {
    /// Snapshot the current network configuration
    Save,

    /// List stored snapshots, newest first
    List,

    /// Show the contents of a snapshot
    Show {
        /// Snapshot id (default: latest)
        id: Option<String>,
    },
}

use clap::{Parser, Subcommand};
use nodehook_engine::HookEvent;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum HookCommands {
    /// List hooks installed in the store
    List {
        /// Only show hooks for this event
        #[arg(long)]
        event: Option<HookEvent>,
    },
    /// Validate a manifest and show the resulting chains
    Check {
        /// Path to hook manifest (TOML)
        manifest: PathBuf,
    },
    /// Replace the stored hooks with a manifest's hooks
    Import {
        /// Path to hook manifest (TOML)
        manifest: PathBuf,
    },
}

#[derive(Parser)]
#[command(name = "nodehookd")]
#[command(about = "nodehook - compute-node event hook engine", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new config file
    Init {
        /// Path for new config file
        #[arg(default_value = "nodehook.toml")]
        path: PathBuf,
    },
    /// Run the engine, reading trigger requests (JSON lines) from stdin
    Serve,
    /// Run one event's hook chain and print the outcome
    Trigger {
        /// Event name, e.g. execjob_end
        #[arg(long)]
        event: HookEvent,
        /// Job id (required for execjob_* events)
        #[arg(long)]
        job: Option<String>,
        /// Event metadata as JSON
        #[arg(long)]
        data: Option<String>,
    },
    /// Manage installed hooks
    Hooks {
        #[command(subcommand)]
        action: HookCommands,
    },
}

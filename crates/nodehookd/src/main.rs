mod cli;
mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands, HookCommands};
use commands::hooks::HooksAction;

#[tokio::main]
async fn main() -> Result<()> {
    nodehook_engine::init_logging();

    let cli = Cli::parse();

    // Handle init command early (doesn't need config)
    if let Commands::Init { path } = &cli.command {
        return commands::init::run_init(path);
    }

    let config = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Init { .. } => {}
        Commands::Serve => {
            commands::serve::execute(&config).await?;
        }
        Commands::Trigger { event, job, data } => {
            commands::trigger::execute(event, job, data, &config).await?;
        }
        Commands::Hooks { action } => {
            let action = match action {
                HookCommands::List { event } => HooksAction::List(event),
                HookCommands::Check { manifest } => HooksAction::Check(manifest),
                HookCommands::Import { manifest } => HooksAction::Import(manifest),
            };
            commands::hooks::execute(action, &config)?;
        }
    }

    Ok(())
}

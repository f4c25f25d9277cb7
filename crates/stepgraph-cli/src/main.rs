//! StepGraph CLI - run the demo topologies against the engine

mod cli;
mod commands;
mod output;

use clap::Parser;
use cli::{Cli, Commands};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose {
        tracing_subscriber::fmt().with_env_filter("debug").init();
    } else {
        tracing_subscriber::fmt().with_env_filter("info").init();
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_command_async(cli))
}

async fn run_command_async(cli: Cli) -> anyhow::Result<()> {
    let config = commands::load_config(cli.config.as_deref())?;
    let format = cli.output;

    match cli.command {
        Commands::Counter { limit, stream } => {
            commands::counter::run(config, limit, stream, format).await?;
        }
        Commands::Approval { reject, note } => {
            commands::approval::run(config, !reject, note, format).await?;
        }
        Commands::Chat { sessions, messages } => {
            commands::chat::run(config, &sessions, &messages, format).await?;
        }
        Commands::Config => {
            output::print_config(&config, format)?;
        }
    }

    Ok(())
}

// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use tracing::error;
use tracing_subscriber::EnvFilter;

fn dispatch(cli: Cli) -> Result<()> {
    if let Commands::Completions { shell } = cli.command {
        return commands::cmd_completions(shell);
    }

    let config = commands::load_config(&cli.config)?;
    match cli.command {
        Commands::Run => commands::cmd_run(&config, cli.skip_preflight),
        Commands::Install { names } => commands::cmd_install(&config, &names, cli.skip_preflight),
        Commands::Store => commands::cmd_store(&config),
        Commands::Persist { paths } => commands::cmd_persist(&config, &paths),
        Commands::Manifest => commands::cmd_manifest(&config),
        Commands::Mirrors => commands::cmd_mirrors(&config),
        Commands::Completions { .. } => Ok(()),
    }
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = dispatch(cli) {
        // Fatal library errors carry their own exit status
        let code = e
            .downcast_ref::<tinyprov::Error>()
            .map(tinyprov::Error::exit_code)
            .unwrap_or(1);
        error!("{:#}", e);
        std::process::exit(code);
    }
}

use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;
mod config;
mod domain;
mod error;
mod infrastructure;
mod k8s;
mod services;
mod tools;

use cli::{Cli, Commands};
use commands::{deploy, render, validate};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging with LOGGING env var support
    // LOGGING=debug,info,warn,error or just LOGGING=debug
    let log_level = std::env::var("LOGGING")
        .or_else(|_| std::env::var("LOG_LEVEL"))
        .unwrap_or_else(|_| {
            if cli.verbose {
                "debug".to_string()
            } else {
                "info".to_string()
            }
        });

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(false)
        .init();

    match cli.command {
        Commands::Deploy {
            input,
            output,
            dry_run,
            timeout,
            drain_interval,
            pin_sidecar_digests,
            skip_replica_lookup,
        } => {
            // dropping the rollout kills the kubectl call in flight
            tokio::select! {
                result = deploy::execute(
                    input,
                    output,
                    dry_run,
                    timeout,
                    drain_interval,
                    pin_sidecar_digests,
                    skip_replica_lookup,
                ) => result?,
                _ = tokio::signal::ctrl_c() => {
                    anyhow::bail!("Interrupted, rollout cancelled; cluster left as last applied");
                }
            }
        }
        Commands::Validate { input } => {
            validate::execute(input)?;
        }
        Commands::Render { input, output } => {
            render::execute(input, output).await?;
        }
    }

    Ok(())
}

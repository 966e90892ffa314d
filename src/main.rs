/*!
 * snapkeeper CLI
 *
 * Author: snapkeeper contributors
 */

use anyhow::Context;
use clap::{Parser, Subcommand};
use snapkeeper::{
    config::{KeeperConfig, LogLevel, DEFAULT_CONFIG_PATH},
    daemon::{Keeper, PassKind},
    error::{KeeperError, EXIT_FATAL, EXIT_SUCCESS, EXIT_UNHEALTHY},
    logging,
};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "snapkeeper")]
#[command(version, about = "Snapshot retention and mirror coordination for block storage volumes", long_about = None)]
struct Cli {
    /// Configuration file (missing file = built-in defaults)
    #[arg(short = 'c', long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH, global = true)]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short = 'd', long, global = true)]
    debug: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<LogLevel>,

    /// Write JSON logs to this file instead of stdout
    #[arg(long, value_name = "FILE", global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every enabled pass on its cadence until interrupted
    Run,

    /// Run a single pass and print its summary
    Once {
        #[arg(value_enum)]
        pass: PassKind,
    },

    /// Run one health pass; exit 1 if any group is unhealthy
    Health,

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            e.downcast_ref::<KeeperError>()
                .map(KeeperError::exit_code)
                .unwrap_or(EXIT_FATAL)
        }
    };
    std::process::exit(code);
}

async fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();

    let mut config = KeeperConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    // CLI flags override the file
    config.debug |= cli.debug;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    if cli.log_file.is_some() {
        config.log_file = cli.log_file.clone();
    }

    if let Commands::Config = cli.command {
        config.validate()?;
        print!("{}", config.to_toml()?);
        return Ok(EXIT_SUCCESS);
    }

    logging::init_logging(&config)?;

    let keeper = Keeper::from_config(config)?;
    keeper.connect().await?;

    match cli.command {
        Commands::Run => {
            let handle = keeper.scheduler()?.start();
            tokio::signal::ctrl_c()
                .await
                .context("waiting for shutdown signal")?;
            info!("Shutdown requested, waiting for running passes");
            handle.shutdown().await;
            Ok(EXIT_SUCCESS)
        }
        Commands::Once { pass } => {
            let stats = keeper.run_pass(pass).await?;
            println!("{}", stats.summary());
            Ok(if stats.is_clean() {
                EXIT_SUCCESS
            } else {
                EXIT_UNHEALTHY
            })
        }
        Commands::Health => {
            keeper.run_pass(PassKind::Health).await?;
            let board = keeper.board();
            for record in board.records() {
                println!(
                    "{}: {}",
                    record.group,
                    record.reason.as_deref().unwrap_or("OK")
                );
            }
            println!("Status: {}", board.status());
            Ok(if board.is_healthy() {
                EXIT_SUCCESS
            } else {
                EXIT_UNHEALTHY
            })
        }
        Commands::Config => Ok(EXIT_SUCCESS),
    }
}

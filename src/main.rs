//! Steward - apply idempotent playbooks to an inventory of hosts
//!
//! This is the main entry point for the Steward CLI.

mod cli;

use anyhow::Result;
use colored::Colorize;
use cli::commands::{CommandContext, Runnable};
use cli::{Cli, Commands};
use steward::config::{Config, LogFormat, LoggingConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();

    let exit_code = match run(&cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "[ERROR]".red().bold(), e);
            exit_code_for(&e)
        }
    };

    std::process::exit(exit_code);
}

async fn run(cli: &Cli) -> Result<i32> {
    let config = Config::load(cli.config.as_deref())?;
    init_logging(cli.verbosity(), &config.logging)?;

    if cli.verbosity() >= 2 {
        tracing::debug!("Steward v{}", steward::VERSION);
    }

    let mut ctx = CommandContext::new(cli, config);

    match &cli.command {
        Commands::Run(args) => args.run(&mut ctx).await,
        Commands::ListHosts(args) => args.run(&mut ctx).await,
        Commands::Vars(args) => args.run(&mut ctx).await,
        Commands::Graph(args) => args.run(&mut ctx).await,
    }
}

/// Exit status for an error that ended the command
fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<steward::Error>())
        .map_or(1, steward::Error::exit_code)
}

/// Initialize logging. `RUST_LOG` wins, then `-v`, then the configured level.
fn init_logging(verbosity: u8, logging: &LoggingConfig) -> Result<()> {
    let filter = match verbosity {
        0 => logging.level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(filter)?,
    };

    let json = logging.format == LogFormat::Json;
    tracing_subscriber::registry()
        .with(env_filter)
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| {
            fmt::layer()
                .with_target(verbosity >= 3)
                .with_writer(std::io::stderr)
        }))
        .try_init()?;
    Ok(())
}

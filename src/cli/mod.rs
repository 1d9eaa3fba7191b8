//! Command-line surface of the `steward` binary.
//!
//! Global flags are accepted before or after the subcommand and override the
//! matching configuration settings.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "steward")]
#[command(version)]
#[command(about = "Apply idempotent playbooks to an inventory of hosts", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Inventory: a YAML/JSON/INI file, a directory of them, or an executable
    #[arg(short = 'i', long, global = true)]
    pub inventory: Option<PathBuf>,

    /// Highest-precedence variables: `key=value` or `@vars.yml`, repeatable
    #[arg(short = 'e', long = "extra-vars", global = true, action = clap::ArgAction::Append)]
    pub extra_vars: Vec<String>,

    /// More log output per repetition, up to -vvv
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Report what would change without touching any host
    #[arg(long = "check", global = true)]
    pub check_mode: bool,

    /// How many hosts run concurrently
    #[arg(short = 'f', long, global = true)]
    pub forks: Option<usize>,

    /// Default task timeout, in seconds or as a duration like "90s"
    #[arg(long, global = true, value_parser = parse_timeout)]
    pub timeout: Option<Duration>,

    /// Only run on hosts that also match this pattern
    #[arg(short = 'l', long, global = true)]
    pub limit: Option<String>,

    /// Configuration file used instead of ./steward.toml
    #[arg(short = 'c', long, global = true, env = "STEWARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// How results are printed
    #[arg(long, global = true, default_value = "human")]
    pub output: OutputFormat,

    /// Plain output even on a terminal
    #[arg(long, global = true)]
    pub no_color: bool,
}

fn parse_timeout(s: &str) -> Result<Duration, String> {
    steward::config::parse_duration(s).map_err(|e| e.to_string())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Per-task status lines and a recap
    #[default]
    Human,
    Json,
    Yaml,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Apply a playbook to its hosts
    Run(commands::run::RunArgs),

    /// Print the hosts a pattern selects
    #[command(name = "list-hosts")]
    ListHosts(commands::inventory::ListHostsArgs),

    /// Print one host's effective variables
    Vars(commands::inventory::VarsArgs),

    /// Print the group tree with member hosts
    Graph(commands::inventory::GraphArgs),
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Count of `-v` flags, capped at 3
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(3)
    }
}

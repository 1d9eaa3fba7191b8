//! Subcommands and the settings they share.

pub mod inventory;
pub mod run;

use crate::cli::output::OutputFormatter;
use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use steward::config::Config;
use steward::executor::ExecutorConfig;
use steward::inventory::{Host, Inventory};
use steward::vars::Vars;

/// Flags resolved against the configuration, plus where output goes
pub struct CommandContext {
    pub config: Config,
    pub output: OutputFormatter,
    pub inventory_path: Option<PathBuf>,
    /// Raw `-e` arguments, parsed by [`CommandContext::parse_extra_vars`]
    pub extra_vars: Vec<String>,
    pub check_mode: bool,
    pub limit: Option<String>,
    pub forks: usize,
    pub timeout: Duration,
}

impl CommandContext {
    /// Flags win over the configuration.
    pub fn new(cli: &crate::cli::Cli, config: Config) -> Self {
        let use_color = !cli.no_color && config.colors.enabled;
        let output = OutputFormatter::new(use_color, cli.output, cli.verbosity());

        Self {
            output,
            inventory_path: cli.inventory.clone(),
            extra_vars: cli.extra_vars.clone(),
            check_mode: cli.check_mode || config.defaults.check_mode,
            limit: cli.limit.clone(),
            forks: cli.forks.unwrap_or(config.defaults.forks).max(1),
            timeout: cli.timeout.unwrap_or(config.defaults.timeout),
            config,
        }
    }

    /// `-i` if given, else the configured default
    pub fn inventory(&self) -> Option<&PathBuf> {
        self.inventory_path
            .as_ref()
            .or(self.config.inventory_path())
    }

    /// Load the inventory, or an implicit `localhost` when none is given
    pub fn load_inventory(&self) -> Result<Inventory> {
        match self.inventory() {
            Some(path) => Inventory::load(path)
                .map_err(steward::Error::from)
                .with_context(|| format!("Failed to load inventory: {}", path.display())),
            None => {
                let mut inventory = Inventory::new();
                inventory.add_host(Host::new("localhost"));
                Ok(inventory)
            }
        }
    }

    /// Parse extra variables, later ones overriding earlier ones
    pub fn parse_extra_vars(&self) -> Result<Vars> {
        let mut vars = Vars::new();

        for var in &self.extra_vars {
            if let Some(file_path) = var.strip_prefix('@') {
                let file_vars = steward::vars::load_vars_file(file_path)
                    .with_context(|| format!("Failed to load extra vars file: {}", file_path))?;
                vars.extend(file_vars);
            } else if var.trim_start().starts_with('{') {
                let inline: Vars = serde_yaml::from_str(var)
                    .with_context(|| format!("Invalid inline extra vars: {}", var))?;
                vars.extend(inline);
            } else if let Some((key, value)) = var.split_once('=') {
                vars.insert(key.trim().to_string(), parse_scalar(value));
            } else {
                bail!("Invalid extra var '{}': expected key=value or @file", var);
            }
        }

        Ok(vars)
    }

    /// Executor settings for this invocation
    pub fn executor_config(&self) -> Result<ExecutorConfig> {
        Ok(ExecutorConfig {
            forks: self.forks,
            check_mode: self.check_mode,
            timeout: Some(self.timeout),
            hash_behaviour: self.config.defaults.hash_behaviour,
            extra_vars: self.parse_extra_vars()?,
            limit: self.limit.clone(),
        })
    }
}

/// `port=8080` gives a number, `debug=true` a bool, anything else a string
fn parse_scalar(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::String(String::new());
    }
    match serde_yaml::from_str::<Value>(raw) {
        Ok(value @ (Value::Bool(_) | Value::Number(_))) => value,
        _ => Value::String(raw.to_string()),
    }
}

#[async_trait::async_trait]
pub trait Runnable {
    /// Returns the process exit code
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;
    use serde_json::json;

    fn context(args: &[&str]) -> CommandContext {
        let cli = Cli::try_parse_from(args).unwrap();
        CommandContext::new(&cli, Config::default())
    }

    #[test]
    fn test_extra_vars_forms() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("extra.yml");
        std::fs::write(&file, "region: eu\nport: 1\n").unwrap();
        let at_file = format!("@{}", file.display());

        let ctx = context(&[
            "steward", "graph", "-e", &at_file, "-e", "port=8080", "-e", "name=web 1", "-e",
            "{\"debug\": true}",
        ]);
        let vars = ctx.parse_extra_vars().unwrap();
        assert_eq!(vars["region"], json!("eu"));
        assert_eq!(vars["port"], json!(8080));
        assert_eq!(vars["name"], json!("web 1"));
        assert_eq!(vars["debug"], json!(true));
    }

    #[test]
    fn test_bad_extra_var() {
        let ctx = context(&["steward", "graph", "-e", "nonsense"]);
        assert!(ctx.parse_extra_vars().is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let ctx = context(&["steward", "graph", "-f", "9", "--timeout", "30"]);
        assert_eq!(ctx.forks, 9);
        assert_eq!(ctx.timeout, Duration::from_secs(30));

        let ctx = context(&["steward", "graph"]);
        assert_eq!(ctx.forks, 5);
        assert_eq!(ctx.timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_implicit_localhost() {
        let ctx = context(&["steward", "graph"]);
        let inventory = ctx.load_inventory().unwrap();
        assert!(inventory.get_host("localhost").is_some());
    }
}

//! `steward run`
//!
//! Ctrl-C cancels the run: hosts that have not started are aborted, running
//! hosts stop before their next task.

use super::{CommandContext, Runnable};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use steward::executor::Executor;
use steward::playbook::Playbook;
use tracing::{info, warn};

#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Playbook YAML; roles/ and vars_files resolve next to it
    #[arg(required = true)]
    pub playbook: PathBuf,
}

impl RunArgs {
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let playbook = Playbook::load(&self.playbook)
            .with_context(|| format!("Failed to load playbook: {}", self.playbook.display()))?;
        let inventory = ctx.load_inventory()?;
        let config = ctx.executor_config()?;

        info!(
            playbook = %self.playbook.display(),
            plays = playbook.plays.len(),
            tasks = playbook.task_count(),
            hosts = inventory.host_count(),
            forks = config.forks,
            check_mode = config.check_mode,
            "Running playbook"
        );

        let executor = Executor::new(config, inventory);
        let token = executor.cancellation_token();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling run");
                token.cancel();
            }
        });

        let report = executor.run_playbook(&playbook).await;
        interrupt.abort();
        let report = report?;

        ctx.output.report(&report)?;
        Ok(report.exit_code())
    }
}

#[async_trait::async_trait]
impl Runnable for RunArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        self.execute(ctx).await
    }
}

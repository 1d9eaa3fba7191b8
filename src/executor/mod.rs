//! Core execution engine for Steward
//!
//! The executor runs a playbook play by play. Within a play:
//! - Hosts run in parallel, at most `forks` at a time
//! - Each host runs its tasks strictly in order, then its notified handlers
//! - `serial` splits the hosts into batches; a batch finishes before the next
//!   one starts
//!
//! Hosts share no mutable state. Each one carries its own [`HostContext`]
//! with its resolved variables, facts, connection and handler queue.
//!
//! Cancelling the executor's token stops hosts at their next task and marks
//! hosts that have not started as aborted. Changes already applied stay.

pub mod host;
pub mod task;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::connection::{ConnectionProvider, LocalConnectionProvider};
use crate::error::{Error, Result};
use crate::inventory::{GroupGraph, Inventory};
use crate::playbook::{Play, Playbook};
use crate::report::{HostReport, PlayReport, RunReport};
use crate::template::TemplateEngine;
use crate::vars::{HashBehaviour, Vars};

pub use host::HostContext;

/// Default deadline for a single module apply
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(300);

/// Configuration for the executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum number of hosts running at once
    pub forks: usize,
    /// Report what would change without applying it
    pub check_mode: bool,
    /// Deadline for tasks that set no `timeout` of their own
    pub timeout: Option<Duration>,
    pub hash_behaviour: HashBehaviour,
    /// Variables from the command line, highest precedence
    pub extra_vars: Vars,
    /// Further restrict every play's hosts to this pattern
    pub limit: Option<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            forks: 5,
            check_mode: false,
            timeout: Some(DEFAULT_TASK_TIMEOUT),
            hash_behaviour: HashBehaviour::default(),
            extra_vars: Vars::new(),
            limit: None,
        }
    }
}

/// What every host of a play needs, shared between the host tasks
#[derive(Clone)]
pub(crate) struct PlayRun {
    pub(crate) play: Arc<Play>,
    pub(crate) scopes: Arc<crate::vars::PlayScopes>,
    pub(crate) inventory: Arc<Inventory>,
    pub(crate) graph: Arc<GroupGraph>,
    pub(crate) provider: Arc<dyn ConnectionProvider>,
    pub(crate) engine: Arc<TemplateEngine>,
    pub(crate) config: Arc<ExecutorConfig>,
    pub(crate) cancel: CancellationToken,
}

/// The main executor engine
pub struct Executor {
    config: Arc<ExecutorConfig>,
    inventory: Arc<Inventory>,
    provider: Arc<dyn ConnectionProvider>,
    engine: Arc<TemplateEngine>,
    cancel: CancellationToken,
}

impl Executor {
    /// Create an executor that runs every host through a local connection
    pub fn new(config: ExecutorConfig, inventory: Inventory) -> Self {
        Self {
            config: Arc::new(config),
            inventory: Arc::new(inventory),
            provider: Arc::new(LocalConnectionProvider::new()),
            engine: Arc::new(TemplateEngine::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Use another way of reaching hosts
    pub fn with_provider(mut self, provider: Arc<dyn ConnectionProvider>) -> Self {
        self.provider = provider;
        self
    }

    /// Share a cancellation token with the caller
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels this executor's runs
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// Run a complete playbook.
    ///
    /// Only errors that stop the whole run are returned (a group containment
    /// cycle, a bad host pattern). Task and host failures are in the report.
    #[instrument(skip(self, playbook), fields(playbook = %playbook.name))]
    pub async fn run_playbook(&self, playbook: &Playbook) -> Result<RunReport> {
        info!("Starting playbook: {}", playbook.name);
        let graph = Arc::new(GroupGraph::build(&self.inventory)?);

        let mut report = RunReport::new(&playbook.name, self.config.check_mode);
        for play in &playbook.plays {
            let play_report = self.run_play(playbook, play, Arc::clone(&graph)).await?;
            report.plays.push(play_report);
        }

        report.cancelled = self.cancel.is_cancelled();
        report.finish();
        let totals = report.totals();
        info!(
            changed = totals.changed,
            failed = totals.failed,
            aborted = totals.aborted,
            "Playbook completed: {}",
            playbook.name
        );
        Ok(report)
    }

    /// Run a single play over its hosts, batch by batch
    #[instrument(skip(self, playbook, play, graph), fields(play = %play.name))]
    pub async fn run_play(
        &self,
        playbook: &Playbook,
        play: &Play,
        graph: Arc<GroupGraph>,
    ) -> Result<PlayReport> {
        info!("Starting play: {}", play.name);
        let hosts = self.play_hosts(&play.hosts)?;
        if hosts.is_empty() {
            warn!("No hosts matched for play: {}", play.name);
            return Ok(PlayReport {
                name: play.name.clone(),
                hosts: Vec::new(),
            });
        }

        let sizes = match &play.serial {
            Some(serial) => serial.batch_sizes(hosts.len())?,
            None => vec![hosts.len()],
        };
        debug!(hosts = hosts.len(), batches = sizes.len(), "Executing play");

        let run = PlayRun {
            play: Arc::new(play.clone()),
            scopes: Arc::new(play.scopes(
                playbook,
                &self.config.extra_vars,
                self.config.hash_behaviour,
            )),
            inventory: Arc::clone(&self.inventory),
            graph,
            provider: Arc::clone(&self.provider),
            engine: Arc::clone(&self.engine),
            config: Arc::clone(&self.config),
            cancel: self.cancel.clone(),
        };

        let mut reports = Vec::with_capacity(hosts.len());
        let mut remaining = hosts.into_iter();
        for size in sizes {
            let batch: Vec<String> = remaining.by_ref().take(size).collect();
            debug!(batch = ?batch, "Starting batch");
            reports.extend(self.run_batch(&run, batch).await);
        }

        info!("Play completed: {}", play.name);
        Ok(PlayReport {
            name: play.name.clone(),
            hosts: reports,
        })
    }

    /// Hosts a play pattern selects, narrowed by the configured limit
    pub fn play_hosts(&self, pattern: &str) -> Result<Vec<String>> {
        let mut hosts: Vec<String> = self
            .inventory
            .hosts_for_pattern(pattern)?
            .into_iter()
            .map(|h| h.name.clone())
            .collect();

        if let Some(limit) = &self.config.limit {
            let allowed: HashSet<&str> = self
                .inventory
                .hosts_for_pattern(limit)?
                .into_iter()
                .map(|h| h.name.as_str())
                .collect();
            hosts.retain(|h| allowed.contains(h.as_str()));
        }
        Ok(hosts)
    }

    /// Run one batch of hosts in parallel, at most `forks` at a time
    async fn run_batch(&self, run: &PlayRun, batch: Vec<String>) -> Vec<HostReport> {
        let semaphore = Arc::new(Semaphore::new(self.config.forks.max(1)));

        let handles: Vec<_> = batch
            .iter()
            .map(|host| {
                let host = host.clone();
                let run = run.clone();
                let semaphore = Arc::clone(&semaphore);

                tokio::spawn(async move {
                    let permit = tokio::select! {
                        biased;
                        _ = run.cancel.cancelled() => None,
                        permit = semaphore.acquire_owned() => permit.ok(),
                    };
                    let Some(_permit) = permit else {
                        return HostReport::aborted(host, Error::Cancelled.to_string());
                    };
                    if run.cancel.is_cancelled() {
                        return HostReport::aborted(host, Error::Cancelled.to_string());
                    }
                    run.run_host(&host).await
                })
            })
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .zip(batch)
            .map(|(joined, host)| {
                joined.unwrap_or_else(|e| HostReport::aborted(host, format!("host run panicked: {}", e)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playbook::{SerialSpec, Task};
    use crate::report::{HostState, TaskStatus};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn inventory() -> Inventory {
        Inventory::from_yaml(
            r#"
web:
  hosts:
    web1:
    web2:
db:
  hosts:
    db1:
"#,
        )
        .unwrap()
    }

    fn playbook(play: Play) -> Playbook {
        Playbook {
            name: "test".into(),
            plays: vec![play],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_limit_narrows_hosts() {
        let config = ExecutorConfig {
            limit: Some("web1,db1".into()),
            ..Default::default()
        };
        let executor = Executor::new(config, inventory());
        assert_eq!(executor.play_hosts("web").unwrap(), vec!["web1"]);
        assert_eq!(executor.play_hosts("all").unwrap(), vec!["web1", "db1"]);
    }

    #[tokio::test]
    async fn test_debug_play_runs_on_every_host() {
        let play = Play::new("hello", "all")
            .with_task(Task::new("greet", "debug", json!({"msg": "hi {{ inventory_hostname }}"})));
        let executor = Executor::new(ExecutorConfig::default(), inventory());
        let report = executor.run_playbook(&playbook(play)).await.unwrap();

        let play = &report.plays[0];
        assert_eq!(play.hosts.len(), 3);
        let web2 = play.host("web2").unwrap();
        assert_eq!(web2.state, HostState::Done);
        assert_eq!(web2.tasks[0].status, TaskStatus::Unchanged);
        assert_eq!(web2.tasks[0].msg, "hi web2");
        assert_eq!(report.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_serial_keeps_host_order() {
        let play = Play::new("serial", "all")
            .with_serial(SerialSpec::Fixed(1))
            .with_task(Task::new("noop", "debug", json!({"msg": "x"})));
        let executor = Executor::new(ExecutorConfig::default(), inventory());
        let report = executor.run_playbook(&playbook(play)).await.unwrap();
        let names: Vec<&str> = report.plays[0].hosts.iter().map(|h| h.host.as_str()).collect();
        assert_eq!(names, vec!["web1", "web2", "db1"]);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_aborts_all_hosts() {
        let play = Play::new("p", "all").with_task(Task::new("noop", "debug", json!({"msg": "x"})));
        let executor = Executor::new(ExecutorConfig::default(), inventory());
        executor.cancellation_token().cancel();

        let report = executor.run_playbook(&playbook(play)).await.unwrap();
        assert!(report.cancelled);
        assert!(report.plays[0]
            .hosts
            .iter()
            .all(|h| h.state == HostState::Aborted && h.tasks.is_empty()));
        assert_eq!(report.exit_code(), 130);
    }

    #[tokio::test]
    async fn test_group_cycle_aborts_run() {
        let mut inv = inventory();
        inv.get_group_mut("web").unwrap().add_child("db");
        inv.get_group_mut("db").unwrap().add_child("web");
        let play = Play::new("p", "all").with_task(Task::new("noop", "debug", json!({"msg": "x"})));

        let err = Executor::new(ExecutorConfig::default(), inv)
            .run_playbook(&playbook(play))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CycleDetected { .. }));
    }
}

//! One host's run through a play: tasks in order, then notified handlers.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::task::{run_task, TaskOutcome};
use super::PlayRun;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::handlers::HandlerNotifier;
use crate::report::{HostReport, HostState};
use crate::vars::resolver::ResolvedVars;
use crate::vars::VariableResolver;

/// Everything a host's tasks read and update. Passed explicitly to every
/// guard and module call.
pub struct HostContext {
    pub host: String,
    /// Layered variables, plus facts and registered results as they arrive
    pub vars: ResolvedVars,
    pub connection: Arc<dyn Connection>,
    pub notifier: HandlerNotifier,
}

impl std::fmt::Debug for HostContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContext")
            .field("host", &self.host)
            .field("connection", &self.connection.identifier())
            .field("pending_handlers", &self.notifier.pending_names())
            .finish()
    }
}

impl PlayRun {
    /// Run the play's tasks and handlers on one host
    #[instrument(skip(self), fields(play = %self.play.name))]
    pub(crate) async fn run_host(&self, host: &str) -> HostReport {
        let mut report = HostReport::new(host);

        let mut ctx = match self.prepare(host).await {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(error = %e, "Host could not start");
                abort(&mut report, &e);
                return report;
            }
        };

        let finished = self.run_tasks(&mut ctx, &mut report).await;
        if finished || self.play.force_handlers {
            self.run_handlers(&mut ctx, &mut report).await;
        } else if ctx.notifier.has_pending() {
            debug!(handlers = ?ctx.notifier.pending_names(), "Skipping handlers of aborted host");
        }

        if report.state != HostState::Aborted {
            report.state = HostState::Done;
        }
        info!(stats = ?report.stats(), "Host finished");
        report
    }

    /// Connect to the host and resolve its variables
    async fn prepare(&self, host: &str) -> Result<HostContext> {
        let inventory_host = self.inventory.host(host)?;
        let connection = self.provider.connect(inventory_host).await?;
        let vars = VariableResolver::new(&self.inventory, &self.graph)
            .with_hash_behaviour(self.config.hash_behaviour)
            .resolve(host, &self.scopes)?;

        Ok(HostContext {
            host: host.to_string(),
            vars,
            connection,
            notifier: HandlerNotifier::new(self.play.all_handlers()),
        })
    }

    /// Returns false when the host stopped early
    async fn run_tasks(&self, ctx: &mut HostContext, report: &mut HostReport) -> bool {
        for (index, task) in self.play.all_tasks().enumerate() {
            if self.cancel.is_cancelled() {
                abort(report, &Error::Cancelled);
                return false;
            }
            report.state = HostState::Running { task: index };
            let outcome = run_task(self, ctx, task, false).await;
            if !record(report, outcome) {
                return false;
            }
        }
        true
    }

    /// Fire notified handlers in declaration order, round after round, until
    /// none are pending
    async fn run_handlers(&self, ctx: &mut HostContext, report: &mut HostReport) {
        if !ctx.notifier.has_pending() {
            return;
        }
        if report.state != HostState::Aborted {
            report.state = HostState::HandlersPending;
        }
        debug!(handlers = ?ctx.notifier.pending_names(), "Running notified handlers");

        while ctx.notifier.has_pending() {
            for index in ctx.notifier.take_round() {
                if self.cancel.is_cancelled() {
                    abort(report, &Error::Cancelled);
                    return;
                }
                if report.state != HostState::Aborted {
                    report.state = HostState::HandlersRunning;
                }
                let handler = ctx.notifier.handler(index).task.clone();
                let outcome = run_task(self, ctx, &handler, true).await;
                if !record(report, outcome) {
                    return;
                }
            }
        }
    }
}

/// Add a task's outcome to the report. Returns whether the host goes on.
fn record(report: &mut HostReport, outcome: TaskOutcome) -> bool {
    let stops = outcome.stops_host();
    report.tasks.push(outcome.report);
    match outcome.fatal {
        Some(e) => {
            abort(report, &e);
            false
        }
        None if stops => {
            report.state = HostState::Aborted;
            false
        }
        None => true,
    }
}

fn abort(report: &mut HostReport, error: &Error) {
    report.state = HostState::Aborted;
    report.error = Some(error.to_string());
}

//! Handler notification tracking.
//!
//! Handlers are tasks that run only when a changed task notifies them, and
//! at most once per host per play. They run after the host's regular tasks,
//! in the order they were declared, not the order they were notified:
//!
//! ```yaml
//! handlers:
//!   - name: restart nginx
//!     listen: web config changed
//!     command: systemctl restart nginx
//! ```
//!
//! A handler may notify other handlers. Those run in a later round, and a
//! handler that already fired is never queued again, which also breaks
//! notification cycles.

use std::collections::{BTreeSet, HashSet};

use crate::error::{Error, Result};
use crate::playbook::Handler;

/// One host's pending and fired handlers
#[derive(Debug, Clone)]
pub struct HandlerNotifier {
    handlers: Vec<Handler>,
    /// Declaration indexes waiting for the next round
    pending: BTreeSet<usize>,
    fired: HashSet<usize>,
}

impl HandlerNotifier {
    pub fn new(handlers: Vec<Handler>) -> Self {
        Self {
            handlers,
            pending: BTreeSet::new(),
            fired: HashSet::new(),
        }
    }

    /// Queue every handler named `name` or listening on it.
    ///
    /// Returns how many handlers were newly queued. A name nothing answers
    /// to is an error.
    pub fn notify(&mut self, name: &str) -> Result<usize> {
        let matches: Vec<usize> = self
            .handlers
            .iter()
            .enumerate()
            .filter(|(_, h)| h.answers_to(name))
            .map(|(i, _)| i)
            .collect();
        if matches.is_empty() {
            return Err(Error::HandlerNotFound(name.to_string()));
        }

        let mut queued = 0;
        for index in matches {
            if !self.fired.contains(&index) && self.pending.insert(index) {
                queued += 1;
            }
        }
        Ok(queued)
    }

    /// Take the handlers due in this round, in declaration order, and mark
    /// them fired.
    pub fn take_round(&mut self) -> Vec<usize> {
        let round: Vec<usize> = std::mem::take(&mut self.pending).into_iter().collect();
        self.fired.extend(round.iter().copied());
        round
    }

    pub fn handler(&self, index: usize) -> &Handler {
        &self.handlers[index]
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Names of handlers still waiting to run
    pub fn pending_names(&self) -> Vec<&str> {
        self.pending.iter().map(|&i| self.handlers[i].name()).collect()
    }

    pub fn fired_count(&self) -> usize {
        self.fired.len()
    }
}

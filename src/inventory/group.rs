//! Inventory groups.
//!
//! Only `children` is authoritative for containment. `parents` is derived
//! by [`Inventory::finalize`](super::Inventory::finalize), and cycles are
//! rejected when the [`GroupGraph`](super::GroupGraph) is built.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::vars::Vars;

/// A named set of hosts and child groups sharing variables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,

    /// Direct members, in declaration order
    #[serde(default)]
    pub hosts: IndexSet<String>,

    /// Contained groups, in declaration order
    #[serde(default)]
    pub children: IndexSet<String>,

    #[serde(skip)]
    pub parents: IndexSet<String>,

    #[serde(default)]
    pub vars: Vars,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hosts: IndexSet::new(),
            children: IndexSet::new(),
            parents: IndexSet::new(),
            vars: Vars::new(),
        }
    }

    pub fn add_host(&mut self, host: impl Into<String>) {
        self.hosts.insert(host.into());
    }

    pub fn has_host(&self, host: &str) -> bool {
        self.hosts.contains(host)
    }

    pub fn add_child(&mut self, child: impl Into<String>) {
        self.children.insert(child.into());
    }

    pub fn has_child(&self, child: &str) -> bool {
        self.children.contains(child)
    }

    pub(crate) fn add_parent(&mut self, parent: impl Into<String>) {
        self.parents.insert(parent.into());
    }

    pub fn has_parent(&self, parent: &str) -> bool {
        self.parents.contains(parent)
    }

    /// Set a group variable; a later value for the same key replaces it
    pub fn set_var(&mut self, key: impl Into<String>, value: Value) {
        self.vars.insert(key.into(), value);
    }

    pub fn get_var(&self, key: &str) -> Option<&Value> {
        self.vars.get(key)
    }
}

impl std::fmt::Display for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({} hosts, {} children)",
            self.name,
            self.hosts.len(),
            self.children.len()
        )
    }
}

/// Fluent construction of a [`Group`], mostly for tests and programmatic
/// inventories
#[derive(Debug)]
pub struct GroupBuilder {
    group: Group,
}

impl GroupBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            group: Group::new(name),
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.group.add_host(host);
        self
    }

    pub fn hosts<I, S>(self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        hosts.into_iter().fold(self, GroupBuilder::host)
    }

    pub fn child(mut self, child: impl Into<String>) -> Self {
        self.group.add_child(child);
        self
    }

    pub fn var(mut self, key: impl Into<String>, value: Value) -> Self {
        self.group.set_var(key, value);
        self
    }

    pub fn build(self) -> Group {
        self.group
    }
}

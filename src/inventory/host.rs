//! Host definition for the Steward inventory.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

use crate::vars::Vars;

/// Host variable naming the address to connect to
pub const ADDRESS_VAR: &str = "ansible_host";

/// Host variable rooting a local connection at a directory
pub const ROOT_VAR: &str = "steward_root";

/// A managed target in the inventory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    /// Inventory name (unique)
    pub name: String,

    /// Address to reach the host at, when different from the name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Host-specific variables
    #[serde(default)]
    pub vars: Vars,

    /// Groups this host is a direct member of, in declaration order
    #[serde(default)]
    pub groups: IndexSet<String>,
}

impl Host {
    /// Create a new host with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: None,
            vars: Vars::new(),
            groups: IndexSet::new(),
        }
    }

    /// The address used to reach this host
    pub fn address(&self) -> &str {
        self.address.as_deref().unwrap_or(&self.name)
    }

    /// Directory a local connection should treat as `/` for this host
    pub fn root_dir(&self) -> Option<PathBuf> {
        self.vars
            .get(ROOT_VAR)
            .and_then(Value::as_str)
            .map(|s| PathBuf::from(shellexpand::tilde(s).as_ref()))
    }

    /// Set a variable, picking out the well-known ones
    pub fn set_var(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if key == ADDRESS_VAR {
            if let Some(address) = value.as_str() {
                self.address = Some(address.to_string());
            }
        }
        self.vars.insert(key, value);
    }

    /// Get a variable
    pub fn get_var(&self, key: &str) -> Option<&Value> {
        self.vars.get(key)
    }

    /// Record membership in a group
    pub fn add_to_group(&mut self, group: impl Into<String>) {
        self.groups.insert(group.into());
    }

    /// Whether the host is a direct member of `group`
    pub fn in_group(&self, group: &str) -> bool {
        self.groups.contains(group)
    }

    /// Direct groups other than the implicit ones
    pub fn explicit_groups(&self) -> impl Iterator<Item = &String> {
        self.groups
            .iter()
            .filter(|g| g.as_str() != "all" && g.as_str() != "ungrouped")
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Host {}

impl std::fmt::Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.address {
            Some(address) if address != &self.name => write!(f, "{} ({})", self.name, address),
            _ => write!(f, "{}", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_address_defaults_to_name() {
        let mut host = Host::new("web1");
        assert_eq!(host.address(), "web1");
        host.set_var(ADDRESS_VAR, json!("10.0.0.5"));
        assert_eq!(host.address(), "10.0.0.5");
        assert_eq!(host.to_string(), "web1 (10.0.0.5)");
        assert_eq!(host.get_var(ADDRESS_VAR), Some(&json!("10.0.0.5")));
    }

    #[test]
    fn test_explicit_groups_skip_implicit() {
        let mut host = Host::new("db1");
        host.add_to_group("all");
        host.add_to_group("databases");
        host.add_to_group("ungrouped");
        let groups: Vec<_> = host.explicit_groups().collect();
        assert_eq!(groups, vec!["databases"]);
        assert!(host.in_group("all"));
    }

    #[test]
    fn test_root_dir() {
        let mut host = Host::new("local");
        assert!(host.root_dir().is_none());
        host.set_var(ROOT_VAR, json!("/srv/sandbox"));
        assert_eq!(host.root_dir(), Some(PathBuf::from("/srv/sandbox")));
    }
}

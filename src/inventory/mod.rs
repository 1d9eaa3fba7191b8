//! Inventory management for Steward.
//!
//! This module provides:
//! - Hosts and groups kept in declaration order
//! - Loading from YAML, INI and JSON formats, directories, and dynamic
//!   inventory executables (run with `--list`)
//! - The group containment DAG ([`GroupGraph`])
//! - Host pattern matching

pub mod graph;
pub mod group;
pub mod host;
mod sources;

pub use graph::GroupGraph;
pub use group::{Group, GroupBuilder};
pub use host::Host;

use indexmap::{IndexMap, IndexSet};
use regex::Regex;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::vars::VarsDirectory;

/// Errors that can occur during inventory operations
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("host not found: {0}")]
    HostNotFound(String),

    #[error("group not found: {0}")]
    GroupNotFound(String),

    #[error("invalid host pattern: {0}")]
    InvalidPattern(String),

    #[error("group containment cycle: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),

    #[error("dynamic inventory script failed: {0}")]
    DynamicInventoryFailed(String),

    #[error("invalid INI format at line {line}: {message}")]
    InvalidIniFormat { line: usize, message: String },

    #[error("failed to load vars next to inventory: {0}")]
    Vars(String),
}

/// Result type for inventory operations
pub type InventoryResult<T> = Result<T, InventoryError>;

/// The main inventory structure holding all hosts and groups
#[derive(Debug, Clone)]
pub struct Inventory {
    /// All hosts in declaration order
    hosts: IndexMap<String, Host>,

    /// All groups in declaration order
    groups: IndexMap<String, Group>,

    /// `group_vars/` and `host_vars/` found next to the inventory
    vars_files: VarsDirectory,

    /// Source file/directory path
    source: Option<PathBuf>,
}

impl Default for Inventory {
    fn default() -> Self {
        Self::new()
    }
}

impl Inventory {
    /// Create a new empty inventory with default groups
    pub fn new() -> Self {
        let mut groups = IndexMap::new();
        groups.insert("all".to_string(), Group::new("all"));
        groups.insert("ungrouped".to_string(), Group::new("ungrouped"));

        Self {
            hosts: IndexMap::new(),
            groups,
            vars_files: VarsDirectory::default(),
            source: None,
        }
    }

    /// Load inventory from a file or directory
    pub fn load<P: AsRef<Path>>(path: P) -> InventoryResult<Self> {
        let path = path.as_ref();
        let mut inventory = Self::new();
        inventory.source = Some(path.to_path_buf());

        let vars_base = if path.is_file() {
            inventory.load_file(path)?;
            path.parent().map(Path::to_path_buf)
        } else if path.is_dir() {
            inventory.load_directory(path)?;
            Some(path.to_path_buf())
        } else {
            return Err(InventoryError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Path not found: {}", path.display()),
            )));
        };

        if let Some(base) = vars_base {
            inventory.vars_files =
                VarsDirectory::load(&base).map_err(|e| InventoryError::Vars(e.to_string()))?;
        }

        inventory.finalize();
        Ok(inventory)
    }

    /// Build an inventory from a YAML document
    pub fn from_yaml(content: &str) -> InventoryResult<Self> {
        let mut inventory = Self::new();
        inventory.parse_yaml(content)?;
        inventory.finalize();
        Ok(inventory)
    }

    /// Build an inventory from a dynamic inventory JSON document
    pub fn from_json(content: &str) -> InventoryResult<Self> {
        let mut inventory = Self::new();
        inventory.parse_json(content)?;
        inventory.finalize();
        Ok(inventory)
    }

    /// Build an inventory from an INI document
    pub fn from_ini(content: &str) -> InventoryResult<Self> {
        let mut inventory = Self::new();
        inventory.parse_ini(content)?;
        inventory.finalize();
        Ok(inventory)
    }

    /// Recompute derived membership after structural changes.
    ///
    /// Parents are rebuilt from children, groups without a parent become
    /// children of `all`, and hosts without an explicit group join
    /// `ungrouped`.
    pub fn finalize(&mut self) {
        for group in self.groups.values_mut() {
            group.parents.clear();
        }

        let edges: Vec<(String, String)> = self
            .groups
            .values()
            .flat_map(|g| g.children.iter().map(|c| (g.name.clone(), c.clone())))
            .collect();
        for (parent, child) in edges {
            self.groups
                .entry(child.clone())
                .or_insert_with(|| Group::new(child))
                .add_parent(parent);
        }

        let roots: Vec<String> = self
            .groups
            .values()
            .filter(|g| g.name != "all" && g.parents.is_empty())
            .map(|g| g.name.clone())
            .collect();
        for root in roots {
            if let Some(all) = self.groups.get_mut("all") {
                all.add_child(root.clone());
            }
            if let Some(group) = self.groups.get_mut(&root) {
                group.add_parent("all");
            }
        }

        let mut ungrouped = IndexSet::new();
        for host in self.hosts.values_mut() {
            if host.explicit_groups().next().is_none() {
                host.add_to_group("ungrouped");
                ungrouped.insert(host.name.clone());
            } else {
                host.groups.shift_remove("ungrouped");
            }
        }
        if let Some(group) = self.groups.get_mut("ungrouped") {
            group.hosts = ungrouped;
        }
    }

    /// Add a host, creating any groups it names
    pub fn add_host(&mut self, host: Host) {
        let name = host.name.clone();
        for group_name in &host.groups {
            self.ensure_group(group_name).add_host(name.clone());
        }
        match self.hosts.get_mut(&name) {
            Some(existing) => {
                existing.vars.extend(host.vars);
                existing.groups.extend(host.groups);
                if host.address.is_some() {
                    existing.address = host.address;
                }
            }
            None => {
                self.hosts.insert(name, host);
            }
        }
        self.finalize();
    }

    /// Add a group, merging into an existing group of the same name and
    /// creating the hosts and child groups it names
    pub fn add_group(&mut self, group: Group) {
        // the group ranks ahead of the children it introduces
        self.ensure_group(&group.name);
        for host_name in &group.hosts {
            self.ensure_host(host_name).add_to_group(group.name.clone());
        }
        for child in &group.children {
            self.ensure_group(child);
        }

        let existing = self.ensure_group(&group.name);
        existing.hosts.extend(group.hosts);
        existing.children.extend(group.children);
        existing.vars.extend(group.vars);
        self.finalize();
    }

    pub(crate) fn ensure_group(&mut self, name: &str) -> &mut Group {
        self.groups
            .entry(name.to_string())
            .or_insert_with(|| Group::new(name))
    }

    pub(crate) fn ensure_host(&mut self, name: &str) -> &mut Host {
        self.hosts
            .entry(name.to_string())
            .or_insert_with(|| Host::new(name))
    }

    /// Get a host by name
    pub fn get_host(&self, name: &str) -> Option<&Host> {
        self.hosts.get(name)
    }

    /// Get a host by name or fail
    pub fn host(&self, name: &str) -> InventoryResult<&Host> {
        self.hosts
            .get(name)
            .ok_or_else(|| InventoryError::HostNotFound(name.to_string()))
    }

    /// Get a mutable reference to a host by name
    pub fn get_host_mut(&mut self, name: &str) -> Option<&mut Host> {
        self.hosts.get_mut(name)
    }

    /// Get a group by name
    pub fn get_group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    /// Get a mutable reference to a group by name
    pub fn get_group_mut(&mut self, name: &str) -> Option<&mut Group> {
        self.groups.get_mut(name)
    }

    /// Get all hosts
    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.hosts.values()
    }

    /// Get all groups
    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    /// Get all host names
    pub fn host_names(&self) -> impl Iterator<Item = &String> {
        self.hosts.keys()
    }

    /// Get all group names
    pub fn group_names(&self) -> impl Iterator<Item = &String> {
        self.groups.keys()
    }

    /// `group_vars/` and `host_vars/` loaded next to the inventory source
    pub fn vars_files(&self) -> &VarsDirectory {
        &self.vars_files
    }

    /// Replace the inventory-adjacent vars
    pub fn set_vars_files(&mut self, vars_files: VarsDirectory) {
        self.vars_files = vars_files;
    }

    /// Where the inventory was loaded from
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Get hosts matching a pattern, in declaration order
    ///
    /// Supported patterns:
    /// - `all` or `*` - all hosts
    /// - `hostname` - specific host
    /// - `groupname` - all hosts in group and its descendants
    /// - `host1:host2` or `host1,host2` - union
    /// - `group1:&group2` - intersection
    /// - `group1:!group2` - exclusion
    /// - `~regex` - regex match on hostname
    /// - `web*` - glob match on hostname
    pub fn hosts_for_pattern(&self, pattern: &str) -> InventoryResult<Vec<&Host>> {
        let names = self.match_pattern(pattern)?;
        Ok(self
            .hosts
            .values()
            .filter(|h| names.contains(h.name.as_str()))
            .collect())
    }

    fn match_pattern(&self, pattern: &str) -> InventoryResult<IndexSet<&str>> {
        let pattern = pattern.trim();
        let mut result: IndexSet<&str> = IndexSet::new();

        if pattern.is_empty() {
            return Ok(result);
        }

        let mut first = true;
        for part in split_pattern(pattern) {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            if let Some(sub) = part.strip_prefix('&') {
                let other = self.match_single(sub)?;
                result.retain(|h| other.contains(h));
            } else if let Some(sub) = part.strip_prefix('!') {
                if first {
                    result = self.match_single("all")?;
                }
                let other = self.match_single(sub)?;
                result.retain(|h| !other.contains(h));
            } else {
                result.extend(self.match_single(part)?);
            }
            first = false;
        }

        Ok(result)
    }

    fn match_single(&self, pattern: &str) -> InventoryResult<IndexSet<&str>> {
        if pattern == "all" || pattern == "*" {
            return Ok(self.hosts.keys().map(String::as_str).collect());
        }

        if let Some(regex_str) = pattern.strip_prefix('~') {
            let regex = Regex::new(regex_str)
                .map_err(|_| InventoryError::InvalidPattern(pattern.to_string()))?;
            return Ok(self
                .hosts
                .keys()
                .filter(|h| regex.is_match(h))
                .map(String::as_str)
                .collect());
        }

        if let Some(group) = self.groups.get(pattern) {
            return Ok(self.hosts_in_group_recursive(group));
        }

        if let Some((name, _)) = self.hosts.get_key_value(pattern) {
            return Ok(IndexSet::from([name.as_str()]));
        }

        if pattern.contains(['*', '?', '[']) {
            let glob = glob::Pattern::new(pattern)
                .map_err(|_| InventoryError::InvalidPattern(pattern.to_string()))?;
            let mut matched: IndexSet<&str> = self
                .hosts
                .keys()
                .filter(|h| glob.matches(h))
                .map(String::as_str)
                .collect();
            for group in self.groups.values().filter(|g| glob.matches(&g.name)) {
                matched.extend(self.hosts_in_group_recursive(group));
            }
            return Ok(matched);
        }

        Err(InventoryError::InvalidPattern(format!(
            "No hosts matched pattern: {}",
            pattern
        )))
    }

    /// Get all hosts in a group, including hosts from child groups
    fn hosts_in_group_recursive(&self, group: &Group) -> IndexSet<&str> {
        let mut hosts = IndexSet::new();
        let mut visited = IndexSet::new();
        let mut stack = vec![group];

        while let Some(current) = stack.pop() {
            if !visited.insert(current.name.as_str()) {
                continue;
            }
            if current.name == "all" {
                hosts.extend(self.hosts.keys().map(String::as_str));
            }
            for host in &current.hosts {
                if let Some((name, _)) = self.hosts.get_key_value(host) {
                    hosts.insert(name.as_str());
                }
            }
            for child in current.children.iter().rev() {
                if let Some(g) = self.groups.get(child) {
                    stack.push(g);
                }
            }
        }

        hosts
    }

    /// Count total hosts
    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    /// Count total groups
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

/// Split pattern by `:` or `,` but not inside brackets
fn split_pattern(pattern: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut bracket_depth: usize = 0;

    for (i, ch) in pattern.char_indices() {
        match ch {
            '[' => bracket_depth += 1,
            ']' => bracket_depth = bracket_depth.saturating_sub(1),
            ':' | ',' if bracket_depth == 0 => {
                parts.push(&pattern[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }

    parts.push(&pattern[start..]);
    parts
}

impl std::fmt::Display for Inventory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Inventory: {} hosts, {} groups",
            self.hosts.len(),
            self.groups.len()
        )?;
        for group in self.groups.values() {
            writeln!(f, "  {}", group)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn names(hosts: Vec<&Host>) -> Vec<&str> {
        hosts.into_iter().map(|h| h.name.as_str()).collect()
    }

    fn sample() -> Inventory {
        Inventory::from_ini(
            r#"
[webservers]
web1
web2

[databases]
db1

[staging]
web2
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_empty_inventory() {
        let inv = Inventory::new();
        assert_eq!(inv.host_count(), 0);
        assert!(inv.get_group("all").is_some());
        assert!(inv.get_group("ungrouped").is_some());
    }

    #[test]
    fn test_add_host_lands_in_ungrouped() {
        let mut inv = Inventory::new();
        inv.add_host(Host::new("webserver1"));

        assert_eq!(inv.host_count(), 1);
        assert!(inv.get_group("ungrouped").unwrap().has_host("webserver1"));
        assert!(inv.get_host("webserver1").unwrap().in_group("ungrouped"));
    }

    #[test]
    fn test_add_group_creates_members() {
        let mut inv = Inventory::new();
        inv.add_group(GroupBuilder::new("web").host("web1").child("web_prod").build());

        assert!(inv.get_host("web1").unwrap().in_group("web"));
        assert!(inv.get_group("web_prod").unwrap().has_parent("web"));
        assert!(inv.get_group("all").unwrap().has_child("web"));
        assert!(!inv.get_group("all").unwrap().has_child("web_prod"));
    }

    #[test]
    fn test_group_ranks_ahead_of_its_new_children() {
        let mut inv = Inventory::new();
        inv.add_group(GroupBuilder::new("web").child("web_prod").child("web_dev").build());
        let names: Vec<&str> = inv.group_names().map(String::as_str).collect();
        assert_eq!(names, vec!["all", "ungrouped", "web", "web_prod", "web_dev"]);
    }

    #[test]
    fn test_display_lists_groups() {
        let mut inv = Inventory::new();
        inv.add_group(GroupBuilder::new("db").host("db1").build());
        let text = inv.to_string();
        assert!(text.starts_with("Inventory: 1 hosts, 3 groups\n"), "{text}");
        assert!(text.contains("  db (1 hosts, 0 children)\n"), "{text}");
    }

    #[test]
    fn test_pattern_matching() {
        let inv = sample();
        assert_eq!(names(inv.hosts_for_pattern("all").unwrap()), vec!["web1", "web2", "db1"]);
        assert_eq!(names(inv.hosts_for_pattern("webservers").unwrap()), vec!["web1", "web2"]);
        assert_eq!(names(inv.hosts_for_pattern("web1").unwrap()), vec!["web1"]);
    }

    #[test]
    fn test_pattern_operators() {
        let inv = sample();
        assert_eq!(
            names(inv.hosts_for_pattern("webservers:databases").unwrap()),
            vec!["web1", "web2", "db1"]
        );
        assert_eq!(
            names(inv.hosts_for_pattern("webservers:&staging").unwrap()),
            vec!["web2"]
        );
        assert_eq!(
            names(inv.hosts_for_pattern("webservers:!staging").unwrap()),
            vec!["web1"]
        );
        assert_eq!(names(inv.hosts_for_pattern("!databases").unwrap()), vec!["web1", "web2"]);
    }

    #[test]
    fn test_glob_and_regex_patterns() {
        let inv = sample();
        assert_eq!(names(inv.hosts_for_pattern("web*").unwrap()), vec!["web1", "web2"]);
        assert_eq!(names(inv.hosts_for_pattern("~db\\d+").unwrap()), vec!["db1"]);
    }

    #[test]
    fn test_unknown_pattern_is_error() {
        let inv = sample();
        assert!(matches!(
            inv.hosts_for_pattern("nothing-here"),
            Err(InventoryError::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_group_pattern_includes_descendants() {
        let inv = Inventory::from_yaml(
            r#"
all:
  children:
    production:
      children:
        web:
          hosts:
            web1:
        db:
          hosts:
            db1:
"#,
        )
        .unwrap();
        assert_eq!(names(inv.hosts_for_pattern("production").unwrap()), vec!["web1", "db1"]);
    }
}

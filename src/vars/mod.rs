//! Variable system for Steward.
//!
//! Variables live in scopes that are totally ordered by [`VarPrecedence`].
//! A [`VarStore`] keeps one layer per scope and merges them lowest first, so
//! on a key collision the highest-precedence scope wins.
//!
//! - [`VarStore`]: the layered store
//! - [`resolver::VariableResolver`]: builds a host's store from inventory,
//!   group graph, playbook and run scopes
//! - [`files::VarsDirectory`]: `group_vars/` and `host_vars/` trees

pub mod files;
pub mod resolver;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Error, Result};

pub use files::VarsDirectory;
pub use resolver::{PlayScopes, VariableResolver};

/// A flat variable mapping.
pub type Vars = IndexMap<String, Value>;

/// Scopes a variable can come from, lowest first. Declaration order is the
/// precedence order; the discriminant is the level shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum VarPrecedence {
    RoleDefaults = 1,
    /// Inline inventory group vars, applied outermost group first
    InventoryGroupVars = 2,
    /// `group_vars/` beside the inventory
    InventoryFileGroupVars = 3,
    PlaybookGroupVarsAll = 4,
    PlaybookGroupVars = 5,
    InventoryHostVars = 6,
    /// `host_vars/` beside the inventory
    InventoryFileHostVars = 7,
    PlaybookHostVars = 8,
    HostFacts = 9,
    PlayVars = 10,
    /// Reserved; prompting is not supported
    PlayVarsPrompt = 11,
    PlayVarsFiles = 12,
    RoleVars = 13,
    /// Reserved
    BlockVars = 14,
    TaskVars = 15,
    /// Reserved
    IncludeVars = 16,
    /// `set_fact` output and `register` results
    SetFacts = 17,
    RoleParams = 18,
    /// Reserved
    IncludeParams = 19,
    /// `-e key=value` on the command line
    ExtraVars = 20,
}

const LEVELS: [VarPrecedence; 20] = [
    VarPrecedence::RoleDefaults,
    VarPrecedence::InventoryGroupVars,
    VarPrecedence::InventoryFileGroupVars,
    VarPrecedence::PlaybookGroupVarsAll,
    VarPrecedence::PlaybookGroupVars,
    VarPrecedence::InventoryHostVars,
    VarPrecedence::InventoryFileHostVars,
    VarPrecedence::PlaybookHostVars,
    VarPrecedence::HostFacts,
    VarPrecedence::PlayVars,
    VarPrecedence::PlayVarsPrompt,
    VarPrecedence::PlayVarsFiles,
    VarPrecedence::RoleVars,
    VarPrecedence::BlockVars,
    VarPrecedence::TaskVars,
    VarPrecedence::IncludeVars,
    VarPrecedence::SetFacts,
    VarPrecedence::RoleParams,
    VarPrecedence::IncludeParams,
    VarPrecedence::ExtraVars,
];

impl VarPrecedence {
    /// Every level, lowest first
    pub fn all() -> impl DoubleEndedIterator<Item = VarPrecedence> {
        LEVELS.into_iter()
    }

    pub fn level(&self) -> u8 {
        *self as u8
    }

    fn label(&self) -> &'static str {
        use VarPrecedence::*;
        match self {
            RoleDefaults => "role defaults",
            InventoryGroupVars => "inventory group vars",
            InventoryFileGroupVars => "inventory group_vars/",
            PlaybookGroupVarsAll => "playbook group_vars/all",
            PlaybookGroupVars => "playbook group_vars/",
            InventoryHostVars => "inventory host vars",
            InventoryFileHostVars => "inventory host_vars/",
            PlaybookHostVars => "playbook host_vars/",
            HostFacts => "host facts",
            PlayVars => "play vars",
            PlayVarsPrompt => "play vars_prompt",
            PlayVarsFiles => "play vars_files",
            RoleVars => "role vars",
            BlockVars => "block vars",
            TaskVars => "task vars",
            IncludeVars => "include vars",
            SetFacts => "facts",
            RoleParams => "role params",
            IncludeParams => "include params",
            ExtraVars => "extra vars",
        }
    }
}

impl std::fmt::Display for VarPrecedence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// How a higher scope's mapping combines with a lower scope's value for the
/// same key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashBehaviour {
    #[default]
    Replace,
    /// Objects are combined recursively with [`deep_merge`]
    Merge,
}

impl HashBehaviour {
    /// Combine `lower` with `higher` under this behaviour.
    pub fn combine(self, lower: &Value, higher: &Value) -> Value {
        match self {
            HashBehaviour::Merge => deep_merge(lower, higher),
            HashBehaviour::Replace => higher.clone(),
        }
    }

    /// Write `value` for `key` into `target` on top of whatever is there.
    pub fn overlay(self, target: &mut Vars, key: &str, value: &Value) {
        let next = match target.get(key) {
            Some(lower) => self.combine(lower, value),
            None => value.clone(),
        };
        target.insert(key.to_string(), next);
    }

    pub fn overlay_all(self, target: &mut Vars, vars: &Vars) {
        vars.iter().for_each(|(key, value)| self.overlay(target, key, value));
    }
}

/// One mapping per scope, flattened on demand.
///
/// Within a scope, setting a key again replaces it (or merges into it under
/// [`HashBehaviour::Merge`]). Across scopes, the flattened view is built by
/// laying the scopes over each other lowest first.
#[derive(Debug, Clone, Default)]
pub struct VarStore {
    scopes: BTreeMap<VarPrecedence, Vars>,
    behaviour: HashBehaviour,
    flat: Option<Vars>,
}

impl VarStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hash_behaviour(behaviour: HashBehaviour) -> Self {
        Self {
            behaviour,
            ..Self::default()
        }
    }

    pub fn hash_behaviour(&self) -> HashBehaviour {
        self.behaviour
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value, precedence: VarPrecedence) {
        self.flat = None;
        let key: String = key.into();
        let behaviour = self.behaviour;
        behaviour.overlay(self.scopes.entry(precedence).or_default(), &key, &value);
    }

    pub fn set_many(&mut self, vars: &Vars, precedence: VarPrecedence) {
        if vars.is_empty() {
            return;
        }
        self.flat = None;
        let behaviour = self.behaviour;
        behaviour.overlay_all(self.scopes.entry(precedence).or_default(), vars);
    }

    /// The effective value of `key` across all scopes
    pub fn get(&mut self, key: &str) -> Option<&Value> {
        self.all().get(key)
    }

    /// The highest scope that defines `key`
    pub fn defined_at(&self, key: &str) -> Option<VarPrecedence> {
        self.scopes
            .iter()
            .rev()
            .find(|(_, vars)| vars.contains_key(key))
            .map(|(level, _)| *level)
    }

    pub fn layer(&self, precedence: VarPrecedence) -> Option<&Vars> {
        self.scopes.get(&precedence)
    }

    pub fn clear_precedence(&mut self, precedence: VarPrecedence) {
        if self.scopes.remove(&precedence).is_some() {
            self.flat = None;
        }
    }

    /// The flattened mapping, cached until the next write
    pub fn all(&mut self) -> &Vars {
        if self.flat.is_none() {
            self.flat = Some(self.flatten(None));
        }
        self.flat.get_or_insert_with(Vars::new)
    }

    /// Flatten with `extra` slotted in at `precedence`, leaving the store
    /// untouched.
    pub fn merged_with(&self, precedence: VarPrecedence, extra: &Vars) -> Vars {
        self.flatten(Some((precedence, extra)))
    }

    fn flatten(&self, extra: Option<(VarPrecedence, &Vars)>) -> Vars {
        let mut flat = Vars::new();
        let mut pending = extra;
        for (level, vars) in &self.scopes {
            // an extra layer sits above an existing layer of the same level
            if let Some((at, extra_vars)) = pending {
                if at < *level {
                    self.behaviour.overlay_all(&mut flat, extra_vars);
                    pending = None;
                }
            }
            self.behaviour.overlay_all(&mut flat, vars);
        }
        if let Some((_, extra_vars)) = pending {
            self.behaviour.overlay_all(&mut flat, extra_vars);
        }
        flat
    }
}

/// Deep merge two values. Objects merge key by key; anything else is replaced.
pub fn deep_merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            let mut merged = base_map.clone();
            for (key, value) in overlay_map {
                let next = match base_map.get(key) {
                    Some(base_value) => deep_merge(base_value, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Object(merged)
        }
        (_, overlay) => overlay.clone(),
    }
}

/// Load a YAML (or JSON) mapping of variables from a file.
pub fn load_vars_file(path: impl AsRef<Path>) -> Result<Vars> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(Vars::new());
    }
    let vars: Option<Vars> = serde_yaml::from_str(&content).map_err(|e| {
        Error::Config(format!(
            "variables file '{}' must contain a mapping: {}",
            path.display(),
            e
        ))
    })?;
    Ok(vars.unwrap_or_default())
}

/// Lookup helpers for nested values
pub mod resolve {
    use serde_json::Value;

    /// Resolve a dotted path (`a.b.0.c`) inside a value
    pub fn resolve_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
        path.split('.').try_fold(value, |current, part| match current {
            Value::Object(map) => map.get(part),
            Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }

    /// Truthiness in the usual playbook sense
    pub fn to_bool(value: &Value) -> bool {
        match value {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
            Value::String(s) => matches!(
                s.to_lowercase().as_str(),
                "true" | "yes" | "on" | "1" | "y"
            ),
            Value::Array(items) => !items.is_empty(),
            Value::Object(map) => !map.is_empty(),
        }
    }
}

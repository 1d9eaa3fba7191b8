//! Per-host variable resolution.
//!
//! [`VariableResolver`] fills a [`VarStore`] for one host: inventory group
//! variables in group-graph order, host variables, then the play-level
//! scopes in [`PlayScopes`]. The result is a [`ResolvedVars`], which later
//! receives facts and registered results as the host's tasks run.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::trace;

use super::{HashBehaviour, VarPrecedence, VarStore, Vars, VarsDirectory};
use crate::error::{Error, Result};
use crate::inventory::{GroupGraph, Host, Inventory};
use crate::template::TemplateEngine;

/// Play-level scopes shared by every host of a play
#[derive(Debug, Clone, Default)]
pub struct PlayScopes {
    /// Merged `defaults/main.yml` of the play's roles
    pub role_defaults: Vars,
    /// `group_vars/` and `host_vars/` next to the playbook
    pub playbook_vars: VarsDirectory,
    /// The play's `vars:`
    pub play_vars: Vars,
    /// Merged contents of the play's `vars_files:`
    pub vars_files: Vars,
    /// Merged `vars/main.yml` of the play's roles
    pub role_vars: Vars,
    /// Parameters given where roles are listed
    pub role_params: Vars,
    /// `--extra-vars`
    pub extra_vars: Vars,
}

/// Builds each host's variable store from the inventory and play scopes
#[derive(Debug, Clone, Copy)]
pub struct VariableResolver<'a> {
    inventory: &'a Inventory,
    graph: &'a GroupGraph,
    hash_behaviour: HashBehaviour,
}

impl<'a> VariableResolver<'a> {
    pub fn new(inventory: &'a Inventory, graph: &'a GroupGraph) -> Self {
        Self {
            inventory,
            graph,
            hash_behaviour: HashBehaviour::default(),
        }
    }

    pub fn with_hash_behaviour(mut self, hash_behaviour: HashBehaviour) -> Self {
        self.hash_behaviour = hash_behaviour;
        self
    }

    /// Layered variables for `host`, unrendered
    pub fn host_store(&self, host: &Host, scopes: &PlayScopes) -> VarStore {
        let mut store = VarStore::with_hash_behaviour(self.hash_behaviour);
        let ancestry = self.graph.ancestry(host.groups.iter().map(String::as_str));
        trace!(host = %host.name, groups = ?ancestry, "Group ancestry");

        store.set_many(&scopes.role_defaults, VarPrecedence::RoleDefaults);

        for group_name in &ancestry {
            if let Some(group) = self.inventory.get_group(group_name) {
                store.set_many(&group.vars, VarPrecedence::InventoryGroupVars);
            }
            if let Some(vars) = self.inventory.vars_files().group(group_name) {
                store.set_many(vars, VarPrecedence::InventoryFileGroupVars);
            }
            if group_name == "all" {
                if let Some(vars) = scopes.playbook_vars.group("all") {
                    store.set_many(vars, VarPrecedence::PlaybookGroupVarsAll);
                }
            } else if let Some(vars) = scopes.playbook_vars.group(group_name) {
                store.set_many(vars, VarPrecedence::PlaybookGroupVars);
            }
        }

        store.set_many(&host.vars, VarPrecedence::InventoryHostVars);
        if let Some(vars) = self.inventory.vars_files().host(&host.name) {
            store.set_many(vars, VarPrecedence::InventoryFileHostVars);
        }
        if let Some(vars) = scopes.playbook_vars.host(&host.name) {
            store.set_many(vars, VarPrecedence::PlaybookHostVars);
        }

        store.set_many(&scopes.play_vars, VarPrecedence::PlayVars);
        store.set_many(&scopes.vars_files, VarPrecedence::PlayVarsFiles);
        store.set_many(&scopes.role_vars, VarPrecedence::RoleVars);
        store.set_many(&scopes.role_params, VarPrecedence::RoleParams);
        store.set_many(&scopes.extra_vars, VarPrecedence::ExtraVars);

        store
    }

    /// Variables the engine defines for every host
    pub fn magic_vars(&self, host: &Host) -> Vars {
        let mut group_names: Vec<String> = self
            .graph
            .ancestry(host.groups.iter().map(String::as_str))
            .into_iter()
            .filter(|g| g != "all" && g != "ungrouped")
            .collect();
        group_names.sort();

        let mut groups = serde_json::Map::new();
        for group in self.inventory.groups() {
            let members = self
                .inventory
                .hosts_for_pattern(&group.name)
                .map(|hosts| hosts.iter().map(|h| Value::String(h.name.clone())).collect())
                .unwrap_or_default();
            groups.insert(group.name.clone(), Value::Array(members));
        }

        let short = host.name.split('.').next().unwrap_or(&host.name).to_string();
        let mut magic = Vars::new();
        magic.insert("inventory_hostname".into(), Value::String(host.name.clone()));
        magic.insert("inventory_hostname_short".into(), Value::String(short));
        magic.insert(
            "group_names".into(),
            Value::Array(group_names.into_iter().map(Value::String).collect()),
        );
        magic.insert("groups".into(), Value::Object(groups));
        magic
    }

    /// Resolve one host's variables and check every reference resolves.
    ///
    /// The checked rendering is kept, so later reads start from it.
    pub fn resolve(&self, host_name: &str, scopes: &PlayScopes) -> Result<ResolvedVars> {
        let host = self.inventory.host(host_name)?;
        let mut resolved = ResolvedVars {
            store: self.host_store(host, scopes),
            magic: self.magic_vars(host),
            rendered: None,
        };
        resolved.refresh(&TemplateEngine::new())?;
        Ok(resolved)
    }
}

/// A host's layered variables plus the engine-defined ones
#[derive(Debug, Clone, Default)]
pub struct ResolvedVars {
    store: VarStore,
    magic: Vars,
    /// Rendering without task vars; dropped whenever a fact changes
    rendered: Option<Rendering>,
}

impl ResolvedVars {
    /// Record a fact or registered result
    pub fn set_fact(&mut self, key: impl Into<String>, value: Value) {
        self.store.set(key, value, VarPrecedence::SetFacts);
        self.rendered = None;
    }

    /// Record facts reported by a module
    pub fn set_facts(&mut self, facts: &Vars) {
        self.store.set_many(facts, VarPrecedence::SetFacts);
        self.rendered = None;
    }

    /// Facts and registered results recorded so far
    pub fn facts(&self) -> Vars {
        self.store
            .layer(VarPrecedence::SetFacts)
            .cloned()
            .unwrap_or_default()
    }

    /// The flat mapping, unrendered
    pub fn flatten(&self) -> Vars {
        self.with_task_vars(&Vars::new())
    }

    /// The flat mapping with task vars applied at their own level
    pub fn with_task_vars(&self, task_vars: &Vars) -> Vars {
        let mut merged = self.store.merged_with(VarPrecedence::TaskVars, task_vars);
        merged.extend(self.magic.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    /// The flat mapping with every value rendered against the others.
    pub fn template_all(&self, engine: &TemplateEngine) -> Result<Vars> {
        match &self.rendered {
            Some(rendering) => Ok(rendering.vars.clone()),
            None => self.render_base(engine).map(|rendering| rendering.vars),
        }
    }

    /// What a task sees: task vars applied, everything rendered except facts
    /// and registered results, which are kept verbatim.
    ///
    /// Only task vars and the values that reference them are rendered again;
    /// everything else comes from the cached rendering.
    pub fn render_for_task(&mut self, engine: &TemplateEngine, task_vars: &Vars) -> Result<Vars> {
        let base = self.refresh(engine)?;
        if task_vars.is_empty() {
            return Ok(base.vars.clone());
        }

        let stale = base.dependents_of(task_vars.keys());
        let seed = base
            .vars
            .iter()
            .filter(|(key, _)| !stale.contains(key.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let raw = self.with_task_vars(task_vars);
        let store = &self.store;
        let frozen = |key: &str| store.defined_at(key) == Some(VarPrecedence::SetFacts);
        Renderer::seeded(engine, &raw, &frozen, seed)
            .run()
            .map(|rendering| rendering.vars)
    }

    /// The cached rendering, computed if a fact changed since the last one
    fn refresh(&mut self, engine: &TemplateEngine) -> Result<&Rendering> {
        if self.rendered.is_none() {
            self.rendered = Some(self.render_base(engine)?);
        }
        Ok(self.rendered.get_or_insert_with(Rendering::default))
    }

    fn render_base(&self, engine: &TemplateEngine) -> Result<Rendering> {
        let raw = self.flatten();
        let frozen = |key: &str| self.is_fact(key);
        Renderer::seeded(engine, &raw, &frozen, Vars::new()).run()
    }

    fn is_fact(&self, key: &str) -> bool {
        self.store.defined_at(key) == Some(VarPrecedence::SetFacts)
    }
}

/// Rendered values plus what each templated value referenced
#[derive(Debug, Clone, Default)]
struct Rendering {
    vars: Vars,
    references: IndexMap<String, BTreeSet<String>>,
}

impl Rendering {
    /// `names` and every value that reaches one of them through references
    fn dependents_of<'k>(&self, names: impl Iterator<Item = &'k String>) -> BTreeSet<String> {
        let mut stale: BTreeSet<String> = names.cloned().collect();
        loop {
            let before = stale.len();
            for (key, refs) in &self.references {
                if !stale.contains(key) && refs.iter().any(|r| stale.contains(r)) {
                    stale.insert(key.clone());
                }
            }
            if stale.len() == before {
                return stale;
            }
        }
    }
}

/// Renders each value once, after the values it references.
///
/// A value is rendered against the already-rendered values it names, so
/// text that came out of a render is never treated as a template again.
/// Frozen keys (facts and registered results) are passed through verbatim.
struct Renderer<'a> {
    engine: &'a TemplateEngine,
    raw: &'a Vars,
    frozen: &'a dyn Fn(&str) -> bool,
    done: Vars,
    references: IndexMap<String, BTreeSet<String>>,
    in_progress: Vec<String>,
}

impl<'a> Renderer<'a> {
    fn seeded(
        engine: &'a TemplateEngine,
        raw: &'a Vars,
        frozen: &'a dyn Fn(&str) -> bool,
        done: Vars,
    ) -> Self {
        Self {
            engine,
            raw,
            frozen,
            done,
            references: IndexMap::new(),
            in_progress: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Rendering> {
        for key in self.raw.keys() {
            self.render_key(key)?;
        }
        let mut done = self.done;
        let vars = self
            .raw
            .keys()
            .filter_map(|key| done.swap_remove(key).map(|value| (key.clone(), value)))
            .collect();
        Ok(Rendering {
            vars,
            references: self.references,
        })
    }

    fn render_key(&mut self, key: &str) -> Result<()> {
        if self.done.contains_key(key) {
            return Ok(());
        }
        let raw = self.raw;
        let Some(value) = raw.get(key) else {
            return Ok(());
        };
        if (self.frozen)(key) || !TemplateEngine::value_has_template(value) {
            self.done.insert(key.to_string(), value.clone());
            return Ok(());
        }
        if self.in_progress.iter().any(|k| k == key) {
            let mut chain = self.in_progress.clone();
            chain.push(key.to_string());
            return Err(Error::template(
                key,
                format!("variables reference each other: {}", chain.join(" -> ")),
            ));
        }

        let references = self.engine.referenced_names(value);
        self.in_progress.push(key.to_string());
        for name in &references {
            self.render_key(name)?;
        }
        self.in_progress.pop();

        let rendered = self.engine.render_value(value, &self.done)?;
        self.done.insert(key.to_string(), rendered);
        self.references.insert(key.to_string(), references);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn resolve(inventory: &Inventory, host: &str, scopes: &PlayScopes) -> Result<Vars> {
        let graph = GroupGraph::build(inventory).unwrap();
        let resolver = VariableResolver::new(inventory, &graph);
        resolver
            .resolve(host, scopes)?
            .template_all(&TemplateEngine::new())
    }

    #[test]
    fn test_host_vars_beat_group_vars() {
        let inv = Inventory::from_yaml(
            r#"
web:
  vars:
    port: 80
  hosts:
    web1:
      port: 8080
    web2:
"#,
        )
        .unwrap();
        let scopes = PlayScopes::default();
        assert_eq!(resolve(&inv, "web1", &scopes).unwrap()["port"], json!(8080));
        assert_eq!(resolve(&inv, "web2", &scopes).unwrap()["port"], json!(80));
    }

    #[test]
    fn test_child_group_beats_parent() {
        let inv = Inventory::from_yaml(
            r#"
web:
  vars:
    env: staging
    tier: frontend
  children:
    web_prod:
      vars:
        env: production
      hosts:
        web1:
"#,
        )
        .unwrap();
        let vars = resolve(&inv, "web1", &PlayScopes::default()).unwrap();
        assert_eq!(vars["env"], json!("production"));
        assert_eq!(vars["tier"], json!("frontend"));
    }

    #[test]
    fn test_later_declared_sibling_wins() {
        let inv = Inventory::from_yaml(
            r#"
web:
  vars:
    role: web
  hosts:
    both:
db:
  vars:
    role: db
  hosts:
    both:
"#,
        )
        .unwrap();
        let vars = resolve(&inv, "both", &PlayScopes::default()).unwrap();
        assert_eq!(vars["role"], json!("db"));
    }

    #[test]
    fn test_play_scopes_order() {
        let inv = Inventory::from_yaml("all:\n  hosts:\n    h:\n      x: host\n").unwrap();
        let mut scopes = PlayScopes {
            role_defaults: Vars::from([("x".to_string(), json!("defaults"))]),
            ..Default::default()
        };
        assert_eq!(resolve(&inv, "h", &scopes).unwrap()["x"], json!("host"));

        scopes.play_vars.insert("x".into(), json!("play"));
        assert_eq!(resolve(&inv, "h", &scopes).unwrap()["x"], json!("play"));

        scopes.role_vars.insert("x".into(), json!("role"));
        assert_eq!(resolve(&inv, "h", &scopes).unwrap()["x"], json!("role"));

        scopes.extra_vars.insert("x".into(), json!("extra"));
        assert_eq!(resolve(&inv, "h", &scopes).unwrap()["x"], json!("extra"));
    }

    #[test]
    fn test_values_reference_each_other() {
        let inv = Inventory::from_yaml("all:\n  hosts:\n    h:\n").unwrap();
        let scopes = PlayScopes {
            play_vars: serde_json::from_value(json!({
                "url": "http://{{ host }}:{{ port }}/",
                "host": "{{ inventory_hostname }}",
                "port": 8080
            }))
            .unwrap(),
            ..Default::default()
        };
        let vars = resolve(&inv, "h", &scopes).unwrap();
        assert_eq!(vars["url"], json!("http://h:8080/"));
    }

    #[test]
    fn test_undefined_reference_names_the_variable() {
        let inv = Inventory::from_yaml("all:\n  hosts:\n    h:\n").unwrap();
        let scopes = PlayScopes {
            play_vars: Vars::from([("greeting".to_string(), json!("hi {{ nobody }}"))]),
            ..Default::default()
        };
        match resolve(&inv, "h", &scopes) {
            Err(Error::UndefinedVariable(name)) => assert_eq!(name, "nobody"),
            other => panic!("expected undefined variable, got {other:?}"),
        }
    }

    #[test]
    fn test_magic_vars() {
        let inv = Inventory::from_yaml(
            "web:\n  hosts:\n    web1.example.com:\ndb:\n  hosts:\n    db1:\n",
        )
        .unwrap();
        let vars = resolve(&inv, "web1.example.com", &PlayScopes::default()).unwrap();
        assert_eq!(vars["inventory_hostname_short"], json!("web1"));
        assert_eq!(vars["group_names"], json!(["web"]));
        assert_eq!(vars["groups"]["db"], json!(["db1"]));
    }

    #[test]
    fn test_task_vars_sit_below_facts() {
        let mut resolved = ResolvedVars::default();
        resolved.set_fact("x", json!("fact"));
        let task_vars = Vars::from([
            ("x".to_string(), json!("task")),
            ("y".to_string(), json!("task")),
        ]);
        let merged = resolved.with_task_vars(&task_vars);
        assert_eq!(merged["x"], json!("fact"));
        assert_eq!(merged["y"], json!("task"));
        assert_eq!(resolved.facts()["x"], json!("fact"));
    }

    #[test]
    fn test_registered_output_is_not_rendered() {
        let mut resolved = ResolvedVars::default();
        resolved.set_fact("out", json!({"stdout": "literal {{ braces }}"}));
        let task_vars = Vars::from([("name".to_string(), json!("{{ who }}")), ("who".to_string(), json!("ops"))]);

        let vars = resolved
            .render_for_task(&TemplateEngine::new(), &task_vars)
            .unwrap();
        assert_eq!(vars["out"]["stdout"], json!("literal {{ braces }}"));
        assert_eq!(vars["name"], json!("ops"));
    }

    #[test]
    fn test_interpolated_fact_text_is_not_rendered_again() {
        let mut resolved = ResolvedVars::default();
        resolved.set_fact("out", json!({"stdout": "literal {{ braces }}"}));
        let task_vars = Vars::from([
            ("y".to_string(), json!("{{ out.stdout }}")),
            ("z".to_string(), json!("got: {{ out.stdout }}")),
        ]);

        let vars = resolved
            .render_for_task(&TemplateEngine::new(), &task_vars)
            .unwrap();
        assert_eq!(vars["y"], json!("literal {{ braces }}"));
        assert_eq!(vars["z"], json!("got: literal {{ braces }}"));
    }

    #[test]
    fn test_chained_reference_to_fact_stays_literal() {
        let mut resolved = ResolvedVars::default();
        resolved.set_fact("banner", json!("{% raw %}{{ x }}"));
        let task_vars = Vars::from([
            ("outer".to_string(), json!("{{ inner }}!")),
            ("inner".to_string(), json!("<{{ banner }}>")),
        ]);
        let vars = resolved
            .render_for_task(&TemplateEngine::new(), &task_vars)
            .unwrap();
        assert_eq!(vars["outer"], json!("<{% raw %}{{ x }}>!"));
    }

    #[test]
    fn test_string_values_keep_their_type() {
        let inv = Inventory::from_yaml("all:\n  hosts:\n    h:\n").unwrap();
        let scopes = PlayScopes {
            play_vars: serde_json::from_value(json!({
                "version": "1.10",
                "pinned": "{{ version }}",
                "line": "key: value",
                "copy_of_line": "{{ line }}"
            }))
            .unwrap(),
            ..Default::default()
        };
        let vars = resolve(&inv, "h", &scopes).unwrap();
        assert_eq!(vars["pinned"], json!("1.10"));
        assert_eq!(vars["copy_of_line"], json!("key: value"));
    }

    #[test]
    fn test_self_reference_is_a_template_error() {
        let inv = Inventory::from_yaml("all:\n  hosts:\n    h:\n").unwrap();
        let scopes = PlayScopes {
            play_vars: serde_json::from_value(json!({"a": "{{ b }}", "b": "x{{ a }}"})).unwrap(),
            ..Default::default()
        };
        assert!(matches!(resolve(&inv, "h", &scopes), Err(Error::Template { .. })));
    }

    #[test]
    fn test_task_vars_rerender_only_their_dependents() {
        let inv = Inventory::from_yaml("all:\n  hosts:\n    h:\n").unwrap();
        let graph = GroupGraph::build(&inv).unwrap();
        let scopes = PlayScopes {
            play_vars: serde_json::from_value(json!({
                "port": 80,
                "url": "http://{{ inventory_hostname }}:{{ port }}/",
                "name": "{{ inventory_hostname }}"
            }))
            .unwrap(),
            ..Default::default()
        };
        let engine = TemplateEngine::new();
        let mut resolved = VariableResolver::new(&inv, &graph).resolve("h", &scopes).unwrap();

        let task_vars = Vars::from([("port".to_string(), json!(8080))]);
        let vars = resolved.render_for_task(&engine, &task_vars).unwrap();
        assert_eq!(vars["url"], json!("http://h:8080/"));
        assert_eq!(vars["name"], json!("h"));

        // the cached rendering is untouched by task vars
        let vars = resolved.render_for_task(&engine, &Vars::new()).unwrap();
        assert_eq!(vars["url"], json!("http://h:80/"));
    }

    #[test]
    fn test_new_fact_refreshes_rendering() {
        let inv = Inventory::from_yaml("all:\n  hosts:\n    h:\n").unwrap();
        let graph = GroupGraph::build(&inv).unwrap();
        let scopes = PlayScopes {
            play_vars: serde_json::from_value(json!({"release": "v1", "tag": "app-{{ release }}"}))
                .unwrap(),
            ..Default::default()
        };
        let engine = TemplateEngine::new();
        let mut resolved = VariableResolver::new(&inv, &graph).resolve("h", &scopes).unwrap();
        assert_eq!(resolved.render_for_task(&engine, &Vars::new()).unwrap()["tag"], json!("app-v1"));

        resolved.set_fact("release", json!("v2"));
        assert_eq!(resolved.render_for_task(&engine, &Vars::new()).unwrap()["tag"], json!("app-v2"));
    }

    #[test]
    fn test_unknown_host() {
        let inv = Inventory::new();
        assert!(matches!(
            resolve(&inv, "ghost", &PlayScopes::default()),
            Err(Error::HostNotFound(_))
        ));
    }
}

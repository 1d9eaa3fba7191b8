//! Set_fact module - Set host variables while a play runs
//!
//! Facts are recorded at the set-facts precedence level for the rest of the
//! host's run. The task reports changed only when some value differs from
//! what the host already sees.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{Diff, Module, ModuleContext, ModuleOutput, ModuleResult};
use crate::vars::Vars;

/// Parameters of the `set_fact` module: every key becomes a fact
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct SetFactArgs(pub Vars);

impl SetFactArgs {
    /// The facts to set, without `set_fact`'s own options
    pub fn facts(&self) -> Vars {
        self.0
            .iter()
            .filter(|(k, _)| k.as_str() != "cacheable")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[async_trait]
impl Module for SetFactArgs {
    /// Current value of each fact name
    type Observed = Vec<(String, Option<Value>)>;
    type Plan = Vars;

    fn name(&self) -> &'static str {
        "set_fact"
    }

    async fn inspect(&self, ctx: &ModuleContext<'_>) -> ModuleResult<Self::Observed> {
        Ok(self
            .facts()
            .into_keys()
            .map(|k| {
                let current = ctx.vars.get(&k).cloned();
                (k, current)
            })
            .collect())
    }

    fn diff(&self, observed: &Self::Observed) -> ModuleResult<Option<Vars>> {
        let desired = self.facts();
        let differs = observed
            .iter()
            .any(|(k, current)| current.as_ref() != desired.get(k));
        Ok(differs.then_some(desired))
    }

    async fn apply(&self, plan: Vars, _ctx: &ModuleContext<'_>) -> ModuleResult<ModuleOutput> {
        let names: Vec<&str> = plan.keys().map(String::as_str).collect();
        let msg = format!("set {}", names.join(", "));
        Ok(ModuleOutput::changed(msg).with_facts(plan))
    }

    fn unchanged(&self, _observed: &Self::Observed) -> ModuleOutput {
        ModuleOutput::ok("facts already set").with_facts(self.facts())
    }

    fn describe(&self, plan: &Vars) -> Option<Diff> {
        let after = serde_json::to_string_pretty(plan).ok()?;
        Some(Diff::new("", after))
    }

    fn applies_in_check_mode(&self) -> bool {
        true
    }
}

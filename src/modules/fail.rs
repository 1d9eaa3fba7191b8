//! Fail module - Stop the host with a message

use async_trait::async_trait;
use serde::Deserialize;

use super::{Module, ModuleContext, ModuleError, ModuleOutput, ModuleResult};

fn default_msg() -> String {
    "Failed as requested from task".to_string()
}

/// Parameters of the `fail` module
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FailArgs {
    #[serde(default = "default_msg")]
    pub msg: String,
}

#[async_trait]
impl Module for FailArgs {
    type Observed = ();
    type Plan = ();

    fn name(&self) -> &'static str {
        "fail"
    }

    async fn inspect(&self, _ctx: &ModuleContext<'_>) -> ModuleResult<()> {
        Ok(())
    }

    fn diff(&self, _observed: &()) -> ModuleResult<Option<()>> {
        Ok(Some(()))
    }

    async fn apply(&self, _plan: (), _ctx: &ModuleContext<'_>) -> ModuleResult<ModuleOutput> {
        Err(ModuleError::Failed(self.msg.clone()))
    }

    fn applies_in_check_mode(&self) -> bool {
        true
    }
}

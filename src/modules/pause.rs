//! Pause module - Wait for a number of seconds

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::{Module, ModuleContext, ModuleError, ModuleOutput, ModuleResult};

/// Parameters of the `pause` module
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PauseArgs {
    #[serde(default)]
    pub seconds: f64,
}

impl PauseArgs {
    pub(super) fn validate(&self) -> ModuleResult<()> {
        if !self.seconds.is_finite() || self.seconds < 0.0 {
            return Err(ModuleError::InvalidParameter(format!(
                "pause: seconds must be a non-negative number, got {}",
                self.seconds
            )));
        }
        Ok(())
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.seconds.max(0.0))
    }
}

#[async_trait]
impl Module for PauseArgs {
    type Observed = ();
    type Plan = Duration;

    fn name(&self) -> &'static str {
        "pause"
    }

    async fn inspect(&self, _ctx: &ModuleContext<'_>) -> ModuleResult<()> {
        Ok(())
    }

    fn diff(&self, _observed: &()) -> ModuleResult<Option<Duration>> {
        Ok(Some(self.duration()))
    }

    async fn apply(&self, wait: Duration, _ctx: &ModuleContext<'_>) -> ModuleResult<ModuleOutput> {
        tokio::time::sleep(wait).await;
        Ok(ModuleOutput::ok(format!("paused for {:?}", wait)))
    }

    fn applies_in_check_mode(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::converge;
    use crate::modules::test_support::Sandbox;

    #[tokio::test]
    async fn test_pause_is_never_a_change() {
        let sandbox = Sandbox::new();
        let pause = PauseArgs { seconds: 0.01 };
        let output = converge(&pause, &sandbox.ctx()).await.unwrap();
        assert!(!output.changed);
        assert_eq!(output.msg, "paused for 10ms");
    }

    #[test]
    fn test_negative_seconds_rejected() {
        assert!(PauseArgs { seconds: -1.0 }.validate().is_err());
        assert!(PauseArgs { seconds: f64::NAN }.validate().is_err());
        assert!(PauseArgs { seconds: 0.0 }.validate().is_ok());
    }
}

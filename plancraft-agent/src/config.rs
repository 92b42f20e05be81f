//! Orchestrator and planner configuration

use plancraft_error::{Error, Result};
use tokio::sync::Semaphore;

/// Configuration for the orchestrator and its plan generator
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    /// Maximum number of turns per request
    pub max_turns: usize,
    /// Repair prompts allowed after the first completion, per model
    pub max_repair_attempts: usize,
    /// Primary model; the provider default when unset
    pub model: Option<String>,
    /// Model tried once the primary model has exhausted its repairs
    pub fallback_model: Option<String>,
    pub temperature: f32,
    /// Upper bound on delegate calls running at the same time within one turn
    pub max_concurrent_delegates: usize,
    /// Run consecutive independent steps concurrently
    pub parallel_steps: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: 3,
            max_repair_attempts: 2,
            model: None,
            fallback_model: None,
            temperature: 0.0,
            max_concurrent_delegates: 4,
            parallel_steps: true,
        }
    }
}

impl AgentConfig {
    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_max_repair_attempts(mut self, attempts: usize) -> Self {
        self.max_repair_attempts = attempts;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_fallback_model(mut self, model: impl Into<String>) -> Self {
        self.fallback_model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_concurrent_delegates(mut self, max: usize) -> Self {
        self.max_concurrent_delegates = max;
        self
    }

    pub fn with_parallel_steps(mut self, enabled: bool) -> Self {
        self.parallel_steps = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_turns == 0 {
            return Err(Error::config_invalid("max_turns must be at least 1")
                .with_operation("config::validate"));
        }
        if self.max_concurrent_delegates == 0 {
            return Err(Error::config_invalid("max_concurrent_delegates must be at least 1")
                .with_operation("config::validate"));
        }
        if self.max_concurrent_delegates > Semaphore::MAX_PERMITS {
            return Err(Error::config_invalid(format!(
                "max_concurrent_delegates must be at most {}, got {}",
                Semaphore::MAX_PERMITS,
                self.max_concurrent_delegates
            ))
            .with_operation("config::validate"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(Error::config_invalid(format!(
                "temperature must be within 0.0..=2.0, got {}",
                self.temperature
            ))
            .with_operation("config::validate"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plancraft_error::ErrorKind;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.max_turns, 3);
        assert_eq!(config.max_repair_attempts, 2);
        assert_eq!(config.max_concurrent_delegates, 4);
        assert!(config.parallel_steps);
        assert!(config.fallback_model.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builders() {
        let config = AgentConfig::default()
            .with_max_turns(5)
            .with_model("gpt-4o-mini")
            .with_fallback_model("gpt-4o")
            .with_parallel_steps(false);
        assert_eq!(config.max_turns, 5);
        assert_eq!(config.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(config.fallback_model.as_deref(), Some("gpt-4o"));
        assert!(!config.parallel_steps);
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let err = AgentConfig::default().with_max_turns(0).validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);

        let err = AgentConfig::default()
            .with_max_concurrent_delegates(0)
            .validate()
            .unwrap_err();
        assert!(err.message().contains("max_concurrent_delegates"));

        assert!(AgentConfig::default().with_temperature(3.5).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_too_many_delegates() {
        let err = AgentConfig::default()
            .with_max_concurrent_delegates(Semaphore::MAX_PERMITS + 1)
            .validate()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
        assert!(err.message().contains("at most"));

        assert!(AgentConfig::default()
            .with_max_concurrent_delegates(Semaphore::MAX_PERMITS)
            .validate()
            .is_ok());
    }
}

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Engine settings for one partition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub partition_id: i32,
    /// When false every authorization check passes.
    pub enable_authorization: bool,
    /// Granularity of due-date wake-ups.
    pub timer_resolution_ms: u64,
    /// Share of the resolution a timer scan may use before yielding.
    pub timer_yield_factor: f64,
    pub yielding_due_date_checker: bool,
    /// Most commands one scheduled task may append.
    pub max_commands_in_batch: usize,
    /// Most parent links followed when looking for a root process instance.
    pub max_root_lookup_depth: usize,
    /// Most parent scopes searched when a listener expression names a variable.
    pub max_variable_scope_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            partition_id: 1,
            enable_authorization: false,
            timer_resolution_ms: 100,
            timer_yield_factor: 0.5,
            yielding_due_date_checker: true,
            max_commands_in_batch: 100,
            max_root_lookup_depth: 1024,
            max_variable_scope_depth: 256,
        }
    }
}

impl EngineConfig {
    /// Reads `BPMN_STREAM_*` variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            partition_id: env_parse("BPMN_STREAM_PARTITION_ID", defaults.partition_id)?,
            enable_authorization: env_bool(
                "BPMN_STREAM_ENABLE_AUTHORIZATION",
                defaults.enable_authorization,
            ),
            timer_resolution_ms: env_parse(
                "BPMN_STREAM_TIMER_RESOLUTION_MS",
                defaults.timer_resolution_ms,
            )?,
            timer_yield_factor: env_parse(
                "BPMN_STREAM_TIMER_YIELD_FACTOR",
                defaults.timer_yield_factor,
            )?,
            yielding_due_date_checker: env_bool(
                "BPMN_STREAM_YIELDING_DUE_DATE_CHECKER",
                defaults.yielding_due_date_checker,
            ),
            max_commands_in_batch: env_parse(
                "BPMN_STREAM_MAX_COMMANDS_IN_BATCH",
                defaults.max_commands_in_batch,
            )?,
            max_root_lookup_depth: env_parse(
                "BPMN_STREAM_MAX_ROOT_LOOKUP_DEPTH",
                defaults.max_root_lookup_depth,
            )?,
            max_variable_scope_depth: env_parse(
                "BPMN_STREAM_MAX_VARIABLE_SCOPE_DEPTH",
                defaults.max_variable_scope_depth,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timer_resolution_ms == 0 {
            return Err(anyhow!("timer_resolution_ms must be positive"));
        }
        if !(0.0..=1.0).contains(&self.timer_yield_factor) {
            return Err(anyhow!(
                "timer_yield_factor must be within [0, 1], got {}",
                self.timer_yield_factor
            ));
        }
        if self.max_commands_in_batch == 0 {
            return Err(anyhow!("max_commands_in_batch must be positive"));
        }
        if self.max_root_lookup_depth == 0 {
            return Err(anyhow!("max_root_lookup_depth must be positive"));
        }
        Ok(())
    }

    pub fn timer_resolution(&self) -> Duration {
        Duration::from_millis(self.timer_resolution_ms)
    }

    /// Milliseconds a scan may run before yielding.
    pub fn yield_budget_ms(&self) -> i64 {
        (self.timer_resolution_ms as f64 * self.timer_yield_factor).round() as i64
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"),
        Err(_) => default,
    }
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(v) => v
            .trim()
            .parse()
            .map_err(|e| anyhow!("Invalid value for {}: {} ({})", key, v, e)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_timer_constants() {
        let config = EngineConfig::default();
        assert_eq!(config.timer_resolution(), Duration::from_millis(100));
        assert_eq!(config.yield_budget_ms(), 50);
        assert!(!config.enable_authorization);
    }

    #[test]
    fn yaml_overrides_only_named_fields() {
        let config = EngineConfig::from_yaml("enable_authorization: true\npartition_id: 3\n").unwrap();
        assert!(config.enable_authorization);
        assert_eq!(config.partition_id, 3);
        assert_eq!(config.max_commands_in_batch, 100);
    }

    #[test]
    fn scope_depth_is_separate_from_root_lookup_depth() {
        let config = EngineConfig::from_yaml("max_variable_scope_depth: 4\n").unwrap();
        assert_eq!(config.max_variable_scope_depth, 4);
        assert_eq!(config.max_root_lookup_depth, 1024);
        assert!(EngineConfig::from_yaml("max_root_lookup_depth: 0\n").is_err());
    }

    #[test]
    fn invalid_yield_factor_is_refused() {
        assert!(EngineConfig::from_yaml("timer_yield_factor: 1.5\n").is_err());
    }
}

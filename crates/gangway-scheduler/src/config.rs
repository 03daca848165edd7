//! Scheduler configuration file.
//!
//! The policy (`actions` plus plugin `tiers`) sits at the top level next to
//! the runtime knobs of the scheduling loop and the bind pool:
//!
//! ```toml
//! actions = ["allocate"]
//! schedule_period_ms = 1000
//! bind_workers = 16
//!
//! [[tiers]]
//! [[tiers.plugins]]
//! name = "priority"
//! [[tiers.plugins]]
//! name = "gang"
//! ```

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use gangway_cache::{BindOptions, RetryPolicy};
use gangway_framework::{PluginRegistry, SchedulerConfiguration};

use crate::action::build_actions;
use crate::error::{SchedulerError, SchedulerResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    #[serde(flatten)]
    pub policy: SchedulerConfiguration,
    /// Time between the starts of two cycles.
    pub schedule_period_ms: u64,
    /// Binds in flight at once.
    pub bind_workers: usize,
    /// Attempts per bind or status write, including the first.
    pub bind_retries: u32,
    /// Initial delay after a conflict; doubles on each retry.
    pub bind_backoff_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            policy: SchedulerConfiguration::default(),
            schedule_period_ms: 1000,
            bind_workers: 16,
            bind_retries: 3,
            bind_backoff_ms: 50,
        }
    }
}

impl SchedulerConfig {
    pub fn from_file(path: &Path) -> SchedulerResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| SchedulerError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> SchedulerResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Reject configurations that could never run a cycle: unknown actions
    /// or plugins, a plugin listed twice, or zero-valued knobs.
    pub fn validate(&self, registry: &PluginRegistry) -> SchedulerResult<()> {
        if self.policy.actions.is_empty() {
            return Err(SchedulerError::InvalidConfig("no actions configured".to_string()));
        }
        build_actions(&self.policy.actions)?;

        let mut seen = BTreeSet::new();
        for option in self.policy.tiers.iter().flat_map(|t| &t.plugins) {
            if !registry.contains(&option.name) {
                return Err(SchedulerError::InvalidConfig(format!(
                    "unknown plugin {}",
                    option.name
                )));
            }
            if !seen.insert(option.name.as_str()) {
                return Err(SchedulerError::InvalidConfig(format!(
                    "plugin {} listed more than once",
                    option.name
                )));
            }
        }

        if self.schedule_period_ms == 0 {
            return Err(SchedulerError::InvalidConfig(
                "schedule_period_ms must be positive".to_string(),
            ));
        }
        if self.bind_workers == 0 {
            return Err(SchedulerError::InvalidConfig(
                "bind_workers must be positive".to_string(),
            ));
        }
        if self.bind_retries == 0 {
            return Err(SchedulerError::InvalidConfig(
                "bind_retries must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn schedule_period(&self) -> Duration {
        Duration::from_millis(self.schedule_period_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.bind_retries,
            backoff: Duration::from_millis(self.bind_backoff_ms),
            ..RetryPolicy::default()
        }
    }

    pub fn bind_options(&self) -> BindOptions {
        BindOptions {
            workers: self.bind_workers,
            retry: self.retry_policy(),
        }
    }
}

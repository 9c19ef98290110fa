use crate::error::{Result, SchedulerError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Which admission predicate guards the (entity, stage class) dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionPolicy {
    /// Deny while any active worker runs the same (entity, stage class).
    #[default]
    Exclusive,
    /// Deny while any active worker differs in both entity and stage class.
    /// Does not by itself keep (entity, stage class) workers exclusive.
    Literal,
}

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub max_workers: usize,
    pub cores: usize,
    pub poll_interval_ms: u64,
    pub admission: AdmissionPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let cores = num_cpus::get().max(1);
        Self {
            max_workers: cores,
            cores,
            poll_interval_ms: 1000,
            admission: AdmissionPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_cores(mut self, cores: usize) -> Self {
        self.cores = cores;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_admission(mut self, admission: AdmissionPolicy) -> Self {
        self.admission = admission;
        self
    }

    /// Global concurrency budget: `min(max_workers, cores)`.
    pub fn budget(&self) -> usize {
        self.max_workers.min(self.cores)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(SchedulerError::config("max_workers must be at least 1"));
        }
        if self.cores == 0 {
            return Err(SchedulerError::config("cores must be at least 1"));
        }
        if self.poll_interval_ms == 0 {
            return Err(SchedulerError::config("poll_interval_ms must be positive"));
        }
        Ok(())
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

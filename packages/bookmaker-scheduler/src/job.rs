use crate::error::{Result, SchedulerError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Checks one dot-delimited identifier component.
pub(crate) fn validate_component(part: &str) -> Result<()> {
    if part.is_empty() || part.contains('.') {
        return Err(SchedulerError::InvalidIdentifier(part.to_string()));
    }
    Ok(())
}

/// Job identifier: `entity.Stage.method[.tag]`
///
/// The entity prefix is the failure-propagation scope key; the optional tag
/// disambiguates sub-jobs that share a signature (e.g. per-page jobs).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId {
    entity: String,
    stage: String,
    method: String,
    tag: Option<String>,
}

impl JobId {
    pub fn new(entity: &str, stage: &str, method: &str) -> Result<Self> {
        if entity.is_empty() {
            return Err(SchedulerError::MissingArgument("entity"));
        }
        if stage.is_empty() {
            return Err(SchedulerError::MissingArgument("stage"));
        }
        if method.is_empty() {
            return Err(SchedulerError::MissingArgument("method"));
        }
        for part in [entity, stage, method] {
            validate_component(part)?;
        }
        Ok(Self {
            entity: entity.to_string(),
            stage: stage.to_string(),
            method: method.to_string(),
            tag: None,
        })
    }

    pub fn with_tag(mut self, tag: &str) -> Result<Self> {
        validate_component(tag)?;
        self.tag = Some(tag.to_string());
        Ok(self)
    }

    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.split('.');
        let (Some(entity), Some(stage), Some(method)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(SchedulerError::InvalidIdentifier(s.to_string()));
        };
        let id = Self::new(entity, stage, method)?;
        match (parts.next(), parts.next()) {
            (None, _) => Ok(id),
            (Some(tag), None) => id.with_tag(tag),
            (Some(_), Some(_)) => Err(SchedulerError::InvalidIdentifier(s.to_string())),
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.entity, self.stage, self.method)?;
        if let Some(tag) = &self.tag {
            write!(f, ".{}", tag)?;
        }
        Ok(())
    }
}

/// Positional and keyword arguments handed to a stage method.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobArgs {
    pub positional: Vec<Value>,
    pub keyword: Map<String, Value>,
}

impl JobArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn kwarg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.keyword.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.keyword.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.keyword.get(key).and_then(Value::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.keyword.get(key).and_then(Value::as_u64)
    }
}

/// Job model
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub args: JobArgs,
}

impl Job {
    pub fn new(id: JobId, args: JobArgs) -> Self {
        Self { id, args }
    }
}

/// How a queue is drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainMode {
    /// One job at a time, inline on the draining task.
    Sync,
    /// Every job on its own worker, then wait for the batch.
    Async,
}

impl DrainMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DrainMode::Sync => "sync",
            DrainMode::Async => "async",
        }
    }
}

impl std::str::FromStr for DrainMode {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sync" => Ok(DrainMode::Sync),
            "async" => Ok(DrainMode::Async),
            _ => Err(SchedulerError::config(format!("Invalid drain mode: {}", s))),
        }
    }
}

impl std::fmt::Display for DrainMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a retired worker ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Completed,
    Failed,
    /// Forcibly retired by an abort; the computation may still be running.
    Destroyed,
}

/// Observable job state (Queued jobs live in a `JobQueue` and are not
/// visible to the scheduler until drained).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobState {
    Waiting {
        queued_at: DateTime<Utc>,
    },
    Active {
        started_at: DateTime<Utc>,
        function: String,
    },
    Retired {
        outcome: JobOutcome,
        elapsed: Duration,
    },
}

impl JobState {
    pub fn state_name(&self) -> &'static str {
        match self {
            JobState::Waiting { .. } => "waiting",
            JobState::Active { .. } => "active",
            JobState::Retired { .. } => "retired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Retired { .. })
    }
}

use crate::error::SchedulerError;
use crate::job::JobId;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// The part of the identifier space a failure covers.
///
/// `stage`/`method` of `None` mean the whole entity (or the whole stage).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureScope {
    pub entity: String,
    pub stage: Option<String>,
    pub method: Option<String>,
}

impl FailureScope {
    pub fn entity(entity: &str) -> Self {
        Self {
            entity: entity.to_string(),
            stage: None,
            method: None,
        }
    }

    pub fn job(id: &JobId) -> Self {
        Self {
            entity: id.entity().to_string(),
            stage: Some(id.stage().to_string()),
            method: Some(id.method().to_string()),
        }
    }

    /// Does this scope overlap the requested (possibly narrowed) query?
    pub fn covers(&self, entity: &str, stage: Option<&str>, method: Option<&str>) -> bool {
        fn part(recorded: &Option<String>, wanted: Option<&str>) -> bool {
            match (recorded.as_deref(), wanted) {
                (Some(r), Some(w)) => r == w,
                _ => true,
            }
        }
        self.entity == entity && part(&self.stage, stage) && part(&self.method, method)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub scope: FailureScope,
    /// Job that raised it; `None` for synthetic abort records.
    pub job: Option<JobId>,
    pub message: String,
    pub abort: bool,
    pub recorded_at: DateTime<Utc>,
}

impl FailureRecord {
    pub fn from_error(job: &JobId, error: &SchedulerError) -> Self {
        Self {
            scope: FailureScope::job(job),
            job: Some(job.clone()),
            message: error.to_string(),
            abort: error.is_abort(),
            recorded_at: Utc::now(),
        }
    }

    /// Synthetic record appended by an abort so dependents observe it.
    pub fn abort(entity: &str) -> Self {
        Self {
            scope: FailureScope::entity(entity),
            job: None,
            message: SchedulerError::aborted(entity).to_string(),
            abort: true,
            recorded_at: Utc::now(),
        }
    }

    /// Re-raise the recorded failure.
    pub fn to_error(&self) -> SchedulerError {
        if self.abort {
            return SchedulerError::aborted(self.scope.entity.clone());
        }
        SchedulerError::StageFailed {
            job: self
                .job
                .as_ref()
                .map_or_else(|| self.scope.entity.clone(), JobId::to_string),
            message: self.message.clone(),
        }
    }
}

/// Accumulated failure records, in the order they were raised.
#[derive(Debug, Default)]
pub struct FailureLog {
    records: Vec<FailureRecord>,
}

impl FailureLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, record: FailureRecord) {
        self.records.push(record);
    }

    /// Drop records raised by `job`, so a resubmission starts clean.
    pub fn clear_job(&mut self, job: &JobId) -> usize {
        let before = self.records.len();
        self.records.retain(|r| r.job.as_ref() != Some(job));
        before - self.records.len()
    }

    pub fn clear_entity(&mut self, entity: &str) {
        self.records.retain(|r| r.scope.entity != entity);
    }

    pub fn matches(&self, entity: &str, stage: Option<&str>, method: Option<&str>) -> bool {
        self.records
            .iter()
            .any(|r| r.scope.covers(entity, stage, method))
    }

    pub fn first_for(&self, entity: &str) -> Option<&FailureRecord> {
        self.records.iter().find(|r| r.scope.entity == entity)
    }

    pub fn has_job(&self, job: &JobId) -> bool {
        self.records.iter().any(|r| r.job.as_ref() == Some(job))
    }

    pub fn records(&self) -> &[FailureRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

use crate::error::{Result, SchedulerError};
use crate::job::{DrainMode, Job, JobArgs, JobId};
use crate::scheduler::{BoundJob, Scheduler};
use tracing::info;
use uuid::Uuid;

/// Ordered batch of jobs, handed to the scheduler as a unit.
///
/// Stage instances are resolved as jobs are added, so an unknown stage class
/// or method fails here rather than at drain time.
pub struct JobQueue {
    scheduler: Scheduler,
    name: String,
    jobs: Vec<BoundJob>,
}

impl JobQueue {
    pub(crate) fn new(scheduler: Scheduler) -> Self {
        Self {
            scheduler,
            name: format!("queue-{}", Uuid::new_v4().simple()),
            jobs: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add(&mut self, entity: &str, stage: &str, method: &str) -> Result<JobId> {
        self.add_with(entity, stage, method, JobArgs::new())
    }

    pub fn add_with(
        &mut self,
        entity: &str,
        stage: &str,
        method: &str,
        args: JobArgs,
    ) -> Result<JobId> {
        let id = JobId::new(entity, stage, method)?;
        self.push(id, args)
    }

    /// Add a job whose signature repeats within the queue (e.g. one per page).
    pub fn add_tagged(
        &mut self,
        entity: &str,
        stage: &str,
        method: &str,
        tag: &str,
        args: JobArgs,
    ) -> Result<JobId> {
        let id = JobId::new(entity, stage, method)?.with_tag(tag)?;
        self.push(id, args)
    }

    fn push(&mut self, id: JobId, args: JobArgs) -> Result<JobId> {
        if self.contains(&id) {
            return Err(SchedulerError::DuplicateJob(id.to_string()));
        }
        let bound = self.scheduler.bind(Job::new(id.clone(), args))?;
        self.jobs.push(bound);
        Ok(id)
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.jobs.iter().any(|b| b.job.id == *id)
    }

    pub fn ids(&self) -> Vec<&JobId> {
        self.jobs.iter().map(|b| &b.job.id).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Run every job and return once the batch is done.
    ///
    /// `Sync` runs the jobs one at a time on the calling task and stops only
    /// on an abort. `Async` gives each job its own worker and fails with the
    /// first error recorded against any of the batch's entities.
    pub async fn drain(self, mode: DrainMode) -> Result<()> {
        info!(queue = %self.name, jobs = self.jobs.len(), %mode, "draining queue");
        self.scheduler.drain_jobs(self.jobs, mode).await
    }

    /// Drain on a background bookkeeping worker and return its key
    /// immediately. Must be called within a tokio runtime.
    pub fn drain_in_background(self, mode: DrainMode) -> String {
        info!(queue = %self.name, jobs = self.jobs.len(), %mode, "draining queue in background");
        self.scheduler.drain_jobs_detached(self.jobs, mode, &self.name)
    }
}

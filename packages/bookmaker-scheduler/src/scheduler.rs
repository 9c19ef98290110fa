use crate::config::{AdmissionPolicy, SchedulerConfig};
use crate::error::{Result, SchedulerError};
use crate::failure::{FailureLog, FailureRecord};
use crate::job::{DrainMode, Job, JobArgs, JobId, JobOutcome, JobState};
use crate::logging::{minutes, EntityLogger, LoggerProvider, TracingLoggers};
use crate::polling::PollingService;
use crate::progress::{self, ProgressState};
use crate::queue::JobQueue;
use crate::registry::{OperationRegistry, StageRegistry};
use crate::stage::Stage;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A job resolved to the shared stage instance that will run it.
pub(crate) struct BoundJob {
    pub job: Job,
    pub stage: Arc<dyn Stage>,
}

struct PendingJob {
    bound: BoundJob,
    queued_at: DateTime<Utc>,
}

enum WorkerKind {
    /// Spawned stage worker.
    Spawned(Arc<dyn Stage>),
    /// Stage method running on a sync drain's own task.
    Inline(Arc<dyn Stage>),
    /// Scheduler machinery (background drains). Exempt from admission and
    /// from the active-job counter.
    Bookkeeping,
}

impl WorkerKind {
    fn stage(&self) -> Option<&Arc<dyn Stage>> {
        match self {
            WorkerKind::Spawned(stage) | WorkerKind::Inline(stage) => Some(stage),
            WorkerKind::Bookkeeping => None,
        }
    }
}

struct WorkerRecord {
    job: Option<JobId>,
    function: String,
    started_at: Instant,
    started_wall: DateTime<Utc>,
    logger: Option<Arc<dyn EntityLogger>>,
    kind: WorkerKind,
    handle: Option<JoinHandle<()>>,
}

impl WorkerRecord {
    fn log_info(&self, key: &str, message: &str) {
        match &self.logger {
            Some(logger) => logger.info(message),
            None => info!(worker = %key, "{}", message),
        }
    }
}

/// Audit record of a worker that is no longer active.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetiredWorker {
    pub key: String,
    pub function: String,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub outcome: JobOutcome,
}

/// Result of offering a job to admission control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
    /// Denied for now; parked in the waiting FIFO.
    Deferred,
}

enum InlineStart {
    Registered,
    /// Polling was stopped: run anyway, outside admission accounting.
    Unregistered,
    Denied,
    /// Removed from the pending set by an abort.
    Cancelled,
}

#[derive(Default)]
struct SchedulerState {
    active: HashMap<String, WorkerRecord>,
    waiting: VecDeque<PendingJob>,
    /// Jobs of running sync drains that have not started yet, keyed by drain.
    sync_pending: HashMap<(u64, JobId), DateTime<Utc>>,
    next_drain: u64,
    failures: FailureLog,
    retired: Vec<RetiredWorker>,
    active_jobs: usize,
}

impl SchedulerState {
    fn stage_workers(&self) -> impl Iterator<Item = &JobId> {
        self.active
            .values()
            .filter(|r| r.kind.stage().is_some())
            .filter_map(|r| r.job.as_ref())
    }

    fn is_queued(&self, id: &JobId) -> bool {
        self.sync_pending.keys().any(|(_, pending)| pending == id)
            || self.waiting.iter().any(|p| p.bound.job.id == *id)
    }

    fn pending_since(&self, id: &JobId) -> Option<DateTime<Utc>> {
        self.sync_pending
            .iter()
            .filter(|((_, pending), _)| pending == id)
            .map(|(_, queued_at)| *queued_at)
            .min()
    }

    fn retire(&mut self, key: String, record: WorkerRecord, outcome: JobOutcome) {
        if let Some(stage) = record.kind.stage() {
            stage.bookkeeping().exit();
            self.active_jobs = self.active_jobs.saturating_sub(1);
        }
        self.retired.push(RetiredWorker {
            key,
            function: record.function,
            started_at: record.started_wall,
            elapsed: record.started_at.elapsed(),
            outcome,
        });
    }
}

struct Inner {
    config: SchedulerConfig,
    registry: OperationRegistry,
    state: Mutex<SchedulerState>,
    polls: PollingService,
}

impl Inner {
    fn admits(&self, state: &SchedulerState, id: &JobId) -> bool {
        let conflict = match self.config.admission {
            AdmissionPolicy::Exclusive => state
                .stage_workers()
                .any(|a| a.entity() == id.entity() && a.stage() == id.stage()),
            AdmissionPolicy::Literal => state
                .stage_workers()
                .any(|a| a.entity() != id.entity() && a.stage() != id.stage()),
        };
        if conflict {
            return false;
        }
        let slack = self.config.budget() as isize - state.active_jobs as isize;
        slack >= 1 && slack <= self.config.max_workers as isize
    }

    fn ensure_polling(self: &Arc<Self>) {
        let weak: Weak<Inner> = Arc::downgrade(self);
        self.polls.start(move || match weak.upgrade() {
            Some(inner) => {
                inner.sweep();
                true
            }
            None => false,
        });
    }

    fn sweep(self: &Arc<Self>) {
        let mut state = self.state.lock();
        self.reap_locked(&mut state);
        self.submit_waiting_locked(&mut state);
    }

    fn reap_locked(&self, state: &mut SchedulerState) {
        let finished: Vec<String> = state
            .active
            .iter()
            .filter(|(_, r)| r.handle.as_ref().is_some_and(JoinHandle::is_finished))
            .map(|(key, _)| key.clone())
            .collect();

        for key in finished {
            let Some(mut record) = state.active.remove(&key) else {
                continue;
            };
            if let (Some(handle), Some(id)) = (record.handle.take(), record.job.as_ref()) {
                if let Some(Err(join_err)) = handle.now_or_never() {
                    if join_err.is_panic() {
                        let err = SchedulerError::WorkerPanicked {
                            job: key.clone(),
                            message: join_err.to_string(),
                        };
                        error!(job = %key, "worker panicked");
                        state.failures.record(FailureRecord::from_error(id, &err));
                    }
                }
            }

            let outcome = match &record.job {
                Some(id) if state.failures.has_job(id) => JobOutcome::Failed,
                _ => JobOutcome::Completed,
            };
            let elapsed = record.started_at.elapsed();
            record.log_info(
                &key,
                &format!("{} finished in {} minutes", key, minutes(elapsed)),
            );
            state.retire(key, record, outcome);
        }
    }

    /// Re-offer deferred jobs in FIFO order, stopping at the first one that
    /// is still denied.
    fn submit_waiting_locked(self: &Arc<Self>, state: &mut SchedulerState) {
        loop {
            let ready = match state.waiting.front() {
                Some(front) => {
                    let id = &front.bound.job.id;
                    !state.active.contains_key(&id.to_string()) && self.admits(state, id)
                }
                None => false,
            };
            if !ready {
                break;
            }
            let Some(pending) = state.waiting.pop_front() else {
                break;
            };
            state.failures.clear_job(&pending.bound.job.id);
            self.spawn_locked(state, pending.bound);
        }
    }

    fn start_worker(self: &Arc<Self>, bound: BoundJob) -> StartOutcome {
        let key = bound.job.id.to_string();
        let mut state = self.state.lock();
        self.reap_locked(&mut state);

        if state.active.contains_key(&key) {
            return StartOutcome::AlreadyRunning;
        }
        state.failures.clear_job(&bound.job.id);

        if !self.admits(&state, &bound.job.id) {
            if !state.waiting.iter().any(|p| p.bound.job.id == bound.job.id) {
                debug!(job = %key, "admission denied, deferring");
                state.waiting.push_back(PendingJob {
                    bound,
                    queued_at: Utc::now(),
                });
            }
            return StartOutcome::Deferred;
        }

        self.spawn_locked(&mut state, bound);
        StartOutcome::Started
    }

    fn spawn_locked(self: &Arc<Self>, state: &mut SchedulerState, bound: BoundJob) {
        let BoundJob { job, stage } = bound;
        let key = job.id.to_string();
        let id = job.id.clone();
        let function = job.id.method().to_string();
        let logger = self.registry.logger(job.id.entity());

        stage.bookkeeping().enter();
        state.active_jobs += 1;

        let inner = Arc::clone(self);
        let worker_stage = stage.clone();
        let worker_logger = logger.clone();
        let handle = tokio::spawn(async move {
            inner.run_worker(job, worker_stage, worker_logger).await;
        });

        logger.info(&format!("started {}", key));
        state.active.insert(
            key,
            WorkerRecord {
                job: Some(id),
                function,
                started_at: Instant::now(),
                started_wall: Utc::now(),
                logger: Some(logger),
                kind: WorkerKind::Spawned(stage),
                handle: Some(handle),
            },
        );
    }

    async fn run_worker(
        self: Arc<Self>,
        job: Job,
        stage: Arc<dyn Stage>,
        logger: Arc<dyn EntityLogger>,
    ) {
        if let Err(e) = stage.invoke(job.id.method(), &job.args).await {
            logger.error(&format!("{} encountered an error: {}", job.id, e));
            self.state
                .lock()
                .failures
                .record(FailureRecord::from_error(&job.id, &e));
        }
        self.polls.wake();
    }

    fn begin_inline(&self, drain: u64, bound: &BoundJob, force: bool) -> InlineStart {
        let id = &bound.job.id;
        let key = id.to_string();
        let pending = (drain, id.clone());
        let mut state = self.state.lock();

        if !state.sync_pending.contains_key(&pending) {
            return InlineStart::Cancelled;
        }
        self.reap_locked(&mut state);

        let admitted = !state.active.contains_key(&key) && self.admits(&state, id);
        if !admitted && !force {
            return InlineStart::Denied;
        }

        state.sync_pending.remove(&pending);
        state.failures.clear_job(id);
        bound.stage.bookkeeping().enter();
        if !admitted {
            return InlineStart::Unregistered;
        }

        state.active_jobs += 1;
        state.active.insert(
            key,
            WorkerRecord {
                job: Some(id.clone()),
                function: id.method().to_string(),
                started_at: Instant::now(),
                started_wall: Utc::now(),
                logger: Some(self.registry.logger(id.entity())),
                kind: WorkerKind::Inline(bound.stage.clone()),
                handle: None,
            },
        );
        InlineStart::Registered
    }

    fn finish_inline(
        &self,
        bound: &BoundJob,
        registered: bool,
        error: Option<&SchedulerError>,
        started_wall: DateTime<Utc>,
        elapsed: Duration,
    ) {
        let id = &bound.job.id;
        let key = id.to_string();
        let outcome = if error.is_some() {
            JobOutcome::Failed
        } else {
            JobOutcome::Completed
        };

        let mut state = self.state.lock();
        if let Some(e) = error {
            state.failures.record(FailureRecord::from_error(id, e));
        }
        if registered {
            // Absent if an abort already retired it.
            if let Some(record) = state.active.remove(&key) {
                state.retire(key, record, outcome);
            }
        } else {
            bound.stage.bookkeeping().exit();
            state.retired.push(RetiredWorker {
                key,
                function: id.method().to_string(),
                started_at: started_wall,
                elapsed,
                outcome,
            });
        }
    }

    /// First recorded failure for `entity` not raised by this drain itself.
    fn escalated_failure(&self, entity: &str, own: &HashSet<JobId>) -> Option<SchedulerError> {
        self.state
            .lock()
            .failures
            .records()
            .iter()
            .find(|r| {
                r.scope.entity == entity && r.job.as_ref().map_or(true, |job| !own.contains(job))
            })
            .map(FailureRecord::to_error)
    }

    async fn drain_sync(self: &Arc<Self>, jobs: Vec<BoundJob>) -> Result<()> {
        self.ensure_polling();
        let drain = {
            let mut state = self.state.lock();
            let drain = state.next_drain;
            state.next_drain += 1;
            let now = Utc::now();
            for bound in &jobs {
                state.sync_pending.insert((drain, bound.job.id.clone()), now);
            }
            drain
        };

        let mut own_failures = HashSet::new();
        let mut cancelled: Option<String> = None;
        let mut remaining = jobs.into_iter();

        while let Some(bound) = remaining.next() {
            let id = bound.job.id.clone();
            let logger = self.registry.logger(id.entity());

            let start = loop {
                match self.begin_inline(drain, &bound, !self.polls.should_poll()) {
                    InlineStart::Denied => self.polls.tick().await,
                    other => break other,
                }
            };
            let registered = match start {
                InlineStart::Registered => true,
                InlineStart::Unregistered => {
                    warn!(job = %id, "polling stopped, running without admission");
                    false
                }
                InlineStart::Cancelled | InlineStart::Denied => {
                    logger.error(&format!("{} cancelled by abort", id));
                    cancelled.get_or_insert_with(|| id.entity().to_string());
                    continue;
                }
            };

            let started_wall = Utc::now();
            let timer = Instant::now();
            let result = AssertUnwindSafe(bound.stage.invoke(id.method(), &bound.job.args))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    error!(job = %id, "inline job panicked");
                    Err(SchedulerError::WorkerPanicked {
                        job: id.to_string(),
                        message: panic_message(payload.as_ref()),
                    })
                });
            let elapsed = timer.elapsed();
            self.finish_inline(
                &bound,
                registered,
                result.as_ref().err(),
                started_wall,
                elapsed,
            );

            let escalated = match result {
                Ok(()) => {
                    logger.info(&format!("{} finished in {} minutes", id, minutes(elapsed)));
                    self.escalated_failure(id.entity(), &own_failures)
                }
                Err(e) => {
                    own_failures.insert(id.clone());
                    Some(e)
                }
            };

            if let Some(err) = escalated {
                logger.error(&format!("{} encountered an error: {}", id, err));
                if err.is_abort() {
                    let mut state = self.state.lock();
                    for rest in remaining {
                        state.sync_pending.remove(&(drain, rest.job.id));
                    }
                    return Err(err);
                }
            }
        }

        match cancelled {
            Some(entity) => Err(SchedulerError::aborted(entity)),
            None => Ok(()),
        }
    }

    async fn drain_async(self: &Arc<Self>, jobs: Vec<BoundJob>) -> Result<()> {
        self.ensure_polling();
        let ids: Vec<JobId> = jobs.iter().map(|b| b.job.id.clone()).collect();
        for bound in jobs {
            let key = bound.job.id.to_string();
            let outcome = self.start_worker(bound);
            debug!(job = %key, ?outcome, "submitted");
        }
        self.wait_till_idle(&ids).await
    }

    /// Block until none of `ids` is active or queued, raising the first
    /// failure recorded in any of their entity scopes as soon as it appears.
    async fn wait_till_idle(&self, ids: &[JobId]) -> Result<()> {
        loop {
            if !self.polls.should_poll() {
                debug!("polling stopped, abandoning wait");
                return Ok(());
            }
            {
                let state = self.state.lock();
                for id in ids {
                    if let Some(record) = state.failures.first_for(id.entity()) {
                        return Err(record.to_error());
                    }
                }
                let idle = ids
                    .iter()
                    .all(|id| !state.active.contains_key(&id.to_string()) && !state.is_queued(id));
                if idle {
                    return Ok(());
                }
            }
            self.polls.tick().await;
        }
    }

    async fn drain(self: &Arc<Self>, jobs: Vec<BoundJob>, mode: DrainMode) -> Result<()> {
        match mode {
            DrainMode::Sync => self.drain_sync(jobs).await,
            DrainMode::Async => self.drain_async(jobs).await,
        }
    }

    fn drain_detached(
        self: &Arc<Self>,
        jobs: Vec<BoundJob>,
        mode: DrainMode,
        queue: &str,
    ) -> String {
        let key = format!("{}.drain_queue", queue);
        let inner = Arc::clone(self);
        let task_key = key.clone();

        let mut state = self.state.lock();
        let handle = tokio::spawn(async move {
            let timer = Instant::now();
            match inner.drain(jobs, mode).await {
                Ok(()) => info!(
                    queue = %task_key,
                    "drained queue {} in {} minutes",
                    task_key,
                    minutes(timer.elapsed())
                ),
                Err(e) => error!(queue = %task_key, "background drain stopped: {}", e),
            }
            inner.polls.wake();
        });
        state.active.insert(
            key.clone(),
            WorkerRecord {
                job: None,
                function: "drain_queue".to_string(),
                started_at: Instant::now(),
                started_wall: Utc::now(),
                logger: None,
                kind: WorkerKind::Bookkeeping,
                handle: Some(handle),
            },
        );
        key
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "panic with non-string payload".to_string()
}

/// Job scheduler.
///
/// Cheap to clone; every clone drives the same state. All admission
/// bookkeeping (active workers, waiting FIFO, failure log) sits behind a
/// single lock so each check-and-mark is atomic.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, stages: StageRegistry) -> Result<Self> {
        Self::with_loggers(config, stages, Arc::new(TracingLoggers::new()))
    }

    pub fn with_loggers(
        config: SchedulerConfig,
        stages: StageRegistry,
        loggers: Arc<dyn LoggerProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let polls = PollingService::new(config.poll_interval());
        info!(
            budget = config.budget(),
            stages = ?stages.names(),
            "scheduler ready"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                registry: OperationRegistry::new(stages, loggers),
                state: Mutex::new(SchedulerState::default()),
                polls,
            }),
        })
    }

    pub fn new_queue(&self) -> JobQueue {
        JobQueue::new(self.clone())
    }

    /// Resolve a job to its stage instance, validating the method name.
    pub(crate) fn bind(&self, job: Job) -> Result<BoundJob> {
        let stage = self
            .inner
            .registry
            .resolve(job.id.entity(), job.id.stage())?;
        if !stage.methods().contains(&job.id.method()) {
            return Err(SchedulerError::UnknownMethod {
                stage: job.id.stage().to_string(),
                method: job.id.method().to_string(),
            });
        }
        Ok(BoundJob { job, stage })
    }

    pub(crate) async fn drain_jobs(&self, jobs: Vec<BoundJob>, mode: DrainMode) -> Result<()> {
        self.inner.drain(jobs, mode).await
    }

    pub(crate) fn drain_jobs_detached(
        &self,
        jobs: Vec<BoundJob>,
        mode: DrainMode,
        queue: &str,
    ) -> String {
        self.inner.ensure_polling();
        self.inner.drain_detached(jobs, mode, queue)
    }

    /// Start one job on its own worker, or park it in the waiting FIFO.
    /// Must be called within a tokio runtime.
    pub fn submit(&self, id: JobId, args: JobArgs) -> Result<StartOutcome> {
        let bound = self.bind(Job::new(id, args))?;
        self.inner.ensure_polling();
        Ok(self.inner.start_worker(bound))
    }

    /// Abort everything, or only `entity`'s work.
    ///
    /// Waiting and queued jobs are dropped and active workers are retired
    /// immediately. Their computations are not preempted; they simply stop
    /// being accounted for. Every touched stage instance is aborted and an
    /// abort failure is recorded so dependents observe it via
    /// [`Scheduler::had_error`].
    pub fn abort(&self, entity: Option<&str>) {
        let inner = &self.inner;
        let mut state = inner.state.lock();

        match entity {
            None => {
                state.waiting.clear();
                state.sync_pending.clear();
            }
            Some(e) => {
                state.waiting.retain(|p| p.bound.job.id.entity() != e);
                state.sync_pending.retain(|(_, id), _| id.entity() != e);
            }
        }

        let doomed: Vec<String> = state
            .active
            .iter()
            .filter(|(_, r)| match entity {
                None => true,
                Some(e) => r.job.as_ref().is_some_and(|id| id.entity() == e),
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in doomed {
            if let Some(mut record) = state.active.remove(&key) {
                record.log_info(&key, &format!("destroying worker {}", key));
                // Dropping the handle detaches the task.
                record.handle.take();
                state.retire(key, record, JobOutcome::Destroyed);
            }
        }

        let touched = match entity {
            Some(e) => vec![e.to_string()],
            None => inner.registry.entities(),
        };
        for e in &touched {
            for instance in inner.registry.instances(e) {
                instance.abort();
            }
            state.failures.record(FailureRecord::abort(e));
        }
        drop(state);

        warn!(entities = ?touched, "aborted");
        inner.polls.notify_waiters();
    }

    /// Global abort plus clearing the keep-polling flag.
    pub fn shutdown(&self) {
        self.abort(None);
        self.inner.polls.stop();
    }

    pub fn had_error(&self, entity: &str, stage: Option<&str>, method: Option<&str>) -> bool {
        if self
            .inner
            .state
            .lock()
            .failures
            .matches(entity, stage, method)
        {
            return true;
        }
        let registry = &self.inner.registry;
        match stage {
            Some(s) => registry
                .get(entity, s)
                .is_some_and(|i| i.bookkeeping().is_aborted()),
            None => registry
                .instances(entity)
                .iter()
                .any(|i| i.bookkeeping().is_aborted()),
        }
    }

    pub fn get_op_state(
        &self,
        entity: &str,
        stage: &str,
        total_units: usize,
    ) -> Result<ProgressState> {
        let registry = &self.inner.registry;
        let instance = registry
            .get(entity, stage)
            .ok_or_else(|| SchedulerError::UnknownOperation {
                entity: entity.to_string(),
                stage: stage.to_string(),
            })?;
        let elapsed = registry
            .started_at(entity)
            .map(|t| t.elapsed())
            .unwrap_or_default();
        Ok(progress::compute(
            &instance.bookkeeping().snapshot(),
            total_units,
            elapsed,
        ))
    }

    /// True while the job is deferred or pending in a sync drain, and for any
    /// job whose entity has no stage instance yet.
    pub fn is_waiting(&self, id: &JobId) -> bool {
        if !self.inner.registry.contains_entity(id.entity()) {
            return true;
        }
        self.inner.state.lock().is_queued(id)
    }

    pub fn is_active(&self, id: &JobId) -> bool {
        self.inner.state.lock().active.contains_key(&id.to_string())
    }

    pub fn job_state(&self, id: &JobId) -> Option<JobState> {
        let key = id.to_string();
        let state = self.inner.state.lock();

        if let Some(record) = state.active.get(&key) {
            return Some(JobState::Active {
                started_at: record.started_wall,
                function: record.function.clone(),
            });
        }
        if let Some(queued_at) = state.pending_since(id) {
            return Some(JobState::Waiting { queued_at });
        }
        if let Some(pending) = state.waiting.iter().find(|p| p.bound.job.id == *id) {
            return Some(JobState::Waiting {
                queued_at: pending.queued_at,
            });
        }
        state
            .retired
            .iter()
            .rev()
            .find(|r| r.key == key)
            .map(|r| JobState::Retired {
                outcome: r.outcome,
                elapsed: r.elapsed,
            })
    }

    pub fn active_job_count(&self) -> usize {
        self.inner.state.lock().active_jobs
    }

    pub fn waiting_count(&self) -> usize {
        self.inner.state.lock().waiting.len()
    }

    pub fn retired(&self) -> Vec<RetiredWorker> {
        self.inner.state.lock().retired.clone()
    }

    pub fn failures(&self) -> Vec<FailureRecord> {
        self.inner.state.lock().failures.records().to_vec()
    }

    pub fn operation(&self, entity: &str, stage: &str) -> Option<Arc<dyn Stage>> {
        self.inner.registry.get(entity, stage)
    }

    /// Release an entity whose processing lifetime is over: its stage
    /// instances and failure records are dropped.
    pub fn forget(&self, entity: &str) {
        self.inner.state.lock().failures.clear_entity(entity);
        self.inner.registry.remove(entity);
    }

    /// Wait until no stage work is active or queued (or polling stops).
    pub async fn wait_idle(&self) {
        self.inner.ensure_polling();
        loop {
            if !self.inner.polls.should_poll() {
                return;
            }
            {
                let state = self.inner.state.lock();
                let busy = state.active.values().any(|r| r.kind.stage().is_some())
                    || !state.waiting.is_empty()
                    || !state.sync_pending.is_empty();
                if !busy {
                    return;
                }
            }
            self.inner.polls.tick().await;
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn budget(&self) -> usize {
        self.inner.config.budget()
    }

    pub fn polling(&self) -> &PollingService {
        &self.inner.polls
    }
}

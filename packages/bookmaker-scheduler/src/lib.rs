/*
 * Bookmaker Scheduler - Job scheduling for the digitization pipeline
 *
 * Runs stage methods (cropping, OCR, ...) for many books concurrently.
 *
 * Architecture:
 * - Operation registry (one stage instance per book and stage class)
 * - Job queues drained sync (inline) or async (one worker per job)
 * - Admission control (per-stage exclusivity + global worker budget)
 * - Failure propagation scoped by entity
 * - Progress and ETA from per-stage bookkeeping
 */

// Public modules
pub mod config;
pub mod error;
pub mod failure;
pub mod job;
pub mod logging;
pub mod polling;
pub mod progress;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod stage;

// Re-exports
pub use config::{AdmissionPolicy, SchedulerConfig};
pub use error::{Result, SchedulerError, ABORT_MARKER};
pub use failure::{FailureLog, FailureRecord, FailureScope};
pub use job::{DrainMode, Job, JobArgs, JobId, JobOutcome, JobState};
pub use logging::{EntityLogger, LoggerProvider, TracingLoggers};
pub use polling::PollingService;
pub use progress::ProgressState;
pub use queue::JobQueue;
pub use registry::{OperationRegistry, StageFactory, StageRegistry};
pub use scheduler::{RetiredWorker, Scheduler, StartOutcome};
pub use stage::{
    Bookkeeping, BookkeepingSnapshot, Completion, OperationSummary, Stage, StageContext,
};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Marker text carried by operator-initiated aborts.
pub const ABORT_MARKER: &str = "User aborted operations";

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Missing required argument: {0}")]
    MissingArgument(&'static str),

    #[error("Invalid identifier component '{0}': must be non-empty and contain no '.'")]
    InvalidIdentifier(String),

    #[error("Unknown stage class: {0}")]
    UnknownStage(String),

    #[error("Stage {stage} has no method {method}")]
    UnknownMethod { stage: String, method: String },

    #[error("Duplicate job identifier in queue: {0}")]
    DuplicateJob(String),

    #[error("Stage class registered twice: {0}")]
    DuplicateStage(String),

    #[error("No operation instance for {entity}.{stage}")]
    UnknownOperation { entity: String, stage: String },

    #[error("Job {job} failed: {message}")]
    StageFailed { job: String, message: String },

    #[error("Worker {job} panicked: {message}")]
    WorkerPanicked { job: String, message: String },

    #[error("User aborted operations: {scope}")]
    Aborted { scope: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SchedulerError {
    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }

    pub fn aborted(scope: impl Into<String>) -> Self {
        Self::Aborted {
            scope: scope.into(),
        }
    }

    /// True for the operator-abort signal, including aborts raised by stage
    /// code through `anyhow` that carry the abort marker.
    pub fn is_abort(&self) -> bool {
        match self {
            Self::Aborted { .. } => true,
            Self::Other(e) => e.to_string().contains(ABORT_MARKER),
            _ => false,
        }
    }

    /// Misuse of the scheduler API. Never retried.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Self::MissingArgument(_)
                | Self::InvalidIdentifier(_)
                | Self::UnknownStage(_)
                | Self::UnknownMethod { .. }
                | Self::DuplicateJob(_)
                | Self::DuplicateStage(_)
                | Self::UnknownOperation { .. }
        )
    }
}

use thiserror::Error;

use crate::job::JobError;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The cron expression could not be parsed. The job was not registered.
    #[error("Invalid schedule '{expression}': {reason}")]
    InvalidSchedule { expression: String, reason: String },

    /// A job with the same name is already in the registry.
    #[error("Job already registered: {name}")]
    DuplicateJob { name: String },

    /// No active job with the given name exists.
    #[error("Job not found: {name}")]
    JobNotFound { name: String },

    /// A previous run of the job (scheduled or manual) has not finished yet.
    #[error("Job already running: {name}")]
    JobAlreadyRunning { name: String },

    /// `stop` has been called; no new runs are accepted.
    #[error("Scheduler is shutting down")]
    ShuttingDown,

    /// The job ran and returned a job-level error.
    #[error("Job {name} failed: {source}")]
    JobFailed {
        name: String,
        #[source]
        source: JobError,
    },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

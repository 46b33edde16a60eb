use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

use crate::types::Trigger;

/// Job-level outcome reported back to the scheduler.
///
/// Only whole-run failures belong here. Per-item problems are the job's
/// own business and should end up in its logs or statistics.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job cancelled")]
    Cancelled,

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Per-execution context handed to [`JobHandler::execute`].
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_name: String,
    /// UUIDv7, sortable in logs.
    pub run_id: Uuid,
    pub trigger: Trigger,
    cancel: CancellationToken,
}

impl JobContext {
    pub fn new(job_name: &str, trigger: Trigger, cancel: CancellationToken) -> Self {
        Self {
            job_name: job_name.to_string(),
            run_id: Uuid::now_v7(),
            trigger,
            cancel,
        }
    }

    /// A manual context with its own, never-cancelled token.
    pub fn detached(job_name: &str) -> Self {
        Self::new(job_name, Trigger::Manual, CancellationToken::new())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Return `Err(JobError::Cancelled)` once cancellation was requested.
    pub fn check_cancelled(&self) -> Result<(), JobError> {
        if self.cancel.is_cancelled() {
            Err(JobError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves when cancellation is requested.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// The execution function of a job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError>;
}

/// A named, schedulable unit of work.
#[derive(Clone)]
pub struct Job {
    pub name: String,
    pub description: String,
    /// Cron expression, validated by `Scheduler::add_job`.
    pub schedule: String,
    pub enabled: bool,
    pub handler: Arc<dyn JobHandler>,
}

impl Job {
    pub fn new(name: &str, schedule: &str, handler: Arc<dyn JobHandler>) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            schedule: schedule.to_string(),
            enabled: true,
            handler,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("schedule", &self.schedule)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// Adapter returned by [`job_fn`].
pub struct FnJob<F>(F);

/// Build a [`JobHandler`] from an async closure.
pub fn job_fn<F, Fut>(f: F) -> Arc<FnJob<F>>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
{
    Arc::new(FnJob(f))
}

#[async_trait]
impl<F, Fut> JobHandler for FnJob<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), JobError>> + Send,
{
    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        (self.0)(ctx.clone()).await
    }
}

//! `partyhub-jobs`: the recurring jobs registered with the scheduler.
//!
//! - [`generation::ContentGenerationOrchestrator`] keeps the catalog topped
//!   up by asking the content provider for new truths and dares for every
//!   (category, language) combination.
//! - [`cleanup::RetentionCleanup`] purges soft-deleted rows older than the
//!   retention window and vacuums the database.

pub mod cleanup;
pub mod error;
pub mod generation;
pub mod retry;

pub use cleanup::{CleanupPreview, CleanupReport, RetentionCleanup, CLEANUP_JOB_NAME};
pub use error::{CleanupError, GenerationError};
pub use generation::{
    ContentGenerationOrchestrator, GenerateError, GenerationCombination, GenerationRequest,
    GenerationSettings, GenerationStats, GENERATION_JOB_NAME,
};
pub use retry::{is_retryable_error, RetryPolicy};

//! `partyhub-scheduler`: in-process cron scheduler for recurring jobs.
//!
//! # Overview
//!
//! Jobs are registered once at startup with a cron expression and an async
//! [`job::JobHandler`]. The [`engine::Scheduler`] keeps them in an in-memory
//! registry, ticks every second and spawns every job whose `next_run_at` has
//! arrived. Jobs can also be run on demand with [`engine::Scheduler::run_job_now`],
//! which blocks the caller until the run completes.
//!
//! # Schedule expressions
//!
//! | Form                    | Example           | Notes                                |
//! |-------------------------|-------------------|--------------------------------------|
//! | 5 fields                | `0 3 * * *`       | min hour dom month dow, dow 0 = Sun  |
//! | 6 fields                | `30 0 3 * * *`    | leading seconds field                |
//! | 7 fields                | `0 0 3 * * * 2030`| trailing year field                  |
//! | descriptor              | `@daily`          | `@hourly`, `@weekly`, `@monthly` ... |
//!
//! Job state is never persisted: a restart starts from a fresh registry.

pub mod engine;
pub mod error;
pub mod job;
pub mod schedule;
pub mod types;

pub use engine::{DrainOutcome, Scheduler, StopHandle};
pub use error::{Result, SchedulerError};
pub use job::{job_fn, Job, JobContext, JobError, JobHandler};
pub use types::{JobInfo, JobStatus, Trigger};

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Months, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use partyhub_content::db::{timestamp, CONTENT_TABLES};
use partyhub_core::config::CleanupJobConfig;
use partyhub_scheduler::{Job, JobContext, JobError, JobHandler};

use crate::error::CleanupError;

pub const CLEANUP_JOB_NAME: &str = "retention-cleanup";

/// What a cleanup run would delete right now.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupPreview {
    pub cutoff_date: DateTime<Utc>,
    pub retention_months: u32,
    pub tasks_to_delete: u64,
    pub categories_to_delete: u64,
}

/// Outcome of one cleanup run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupReport {
    pub cutoff_date: DateTime<Utc>,
    pub tasks_deleted: u64,
    pub categories_deleted: u64,
    pub bytes_before: u64,
    pub bytes_after: u64,
    /// False when storage reclamation failed; the purge itself still stands.
    pub reclaimed: bool,
}

impl CleanupReport {
    pub fn bytes_reclaimed(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

/// Purges soft-deleted catalog rows older than the retention window.
///
/// Clones share the same connection.
#[derive(Clone)]
pub struct RetentionCleanup {
    db: Arc<Mutex<Connection>>,
    retention_months: u32,
}

impl RetentionCleanup {
    pub fn new(conn: Connection, retention_months: u32) -> Self {
        Self {
            db: Arc::new(Mutex::new(conn)),
            retention_months,
        }
    }

    pub fn into_job(self: Arc<Self>, config: &CleanupJobConfig) -> Job {
        Job::new(CLEANUP_JOB_NAME, &config.schedule, self)
            .with_description("Purge soft-deleted content past the retention window")
            .with_enabled(config.enabled)
    }

    pub fn retention_months(&self) -> u32 {
        self.retention_months
    }

    /// `now` minus the retention window in calendar months.
    pub fn cutoff_date(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, CleanupError> {
        now.checked_sub_months(Months::new(self.retention_months))
            .ok_or(CleanupError::InvalidRetention(self.retention_months))
    }

    /// Count rows a run would purge. Read-only.
    pub fn preview(&self) -> Result<CleanupPreview, CleanupError> {
        self.preview_at(Utc::now())
    }

    fn preview_at(&self, now: DateTime<Utc>) -> Result<CleanupPreview, CleanupError> {
        let cutoff_date = self.cutoff_date(now)?;
        let cutoff = timestamp(cutoff_date);
        let db = self.db.lock().unwrap();
        let count = |table: &str| -> Result<u64, CleanupError> {
            let n: i64 = db.query_row(
                &format!(
                    "SELECT COUNT(*) FROM {table}
                     WHERE deleted_at IS NOT NULL AND deleted_at < ?1"
                ),
                [&cutoff],
                |row| row.get(0),
            )?;
            Ok(n as u64)
        };

        Ok(CleanupPreview {
            cutoff_date,
            retention_months: self.retention_months,
            tasks_to_delete: count("tasks")?,
            categories_to_delete: count("categories")?,
        })
    }

    /// Purge expired rows, then vacuum the database.
    ///
    /// Tables are purged one after another without a surrounding
    /// transaction; when a later table fails, earlier ones stay purged.
    pub fn run(&self) -> Result<CleanupReport, CleanupError> {
        self.run_at(Utc::now())
    }

    #[instrument(skip(self), fields(retention_months = self.retention_months))]
    fn run_at(&self, now: DateTime<Utc>) -> Result<CleanupReport, CleanupError> {
        let cutoff_date = self.cutoff_date(now)?;
        let cutoff = timestamp(cutoff_date);
        let db = self.db.lock().unwrap();

        let mut deleted = [0u64; CONTENT_TABLES.len()];
        for (i, &table) in CONTENT_TABLES.iter().enumerate() {
            let n = db
                .execute(
                    &format!(
                        "DELETE FROM {table}
                         WHERE deleted_at IS NOT NULL AND deleted_at < ?1"
                    ),
                    [&cutoff],
                )
                .map_err(|source| CleanupError::Purge { table, source })?;
            info!(table, deleted = n, cutoff = %cutoff, "purged expired rows");
            deleted[i] = n as u64;
        }

        let (bytes_before, bytes_after, reclaimed) = match reclaim(&db) {
            Ok((before, after)) => (before, after, true),
            Err(e) => {
                warn!(error = %e, "storage reclamation failed");
                (0, 0, false)
            }
        };

        let report = CleanupReport {
            cutoff_date,
            tasks_deleted: deleted[0],
            categories_deleted: deleted[1],
            bytes_before,
            bytes_after,
            reclaimed,
        };
        info!(
            tasks = report.tasks_deleted,
            categories = report.categories_deleted,
            bytes_reclaimed = report.bytes_reclaimed(),
            "retention cleanup finished"
        );
        Ok(report)
    }
}

/// VACUUM the database, returning its size in bytes before and after.
fn reclaim(db: &Connection) -> Result<(u64, u64), CleanupError> {
    let before = database_size(db).map_err(CleanupError::Reclamation)?;
    db.execute_batch("VACUUM")
        .map_err(CleanupError::Reclamation)?;
    let after = database_size(db).map_err(CleanupError::Reclamation)?;
    Ok((before, after))
}

fn database_size(db: &Connection) -> rusqlite::Result<u64> {
    let pages: i64 = db.query_row("PRAGMA page_count", [], |row| row.get(0))?;
    let page_size: i64 = db.query_row("PRAGMA page_size", [], |row| row.get(0))?;
    Ok((pages * page_size) as u64)
}

#[async_trait]
impl JobHandler for RetentionCleanup {
    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        ctx.check_cancelled()?;
        // DELETE and VACUUM block on SQLite; keep them off the runtime workers.
        let cleanup = self.clone();
        tokio::task::spawn_blocking(move || cleanup.run())
            .await
            .map_err(|e| JobError::Failed(anyhow::Error::new(e)))?
            .map_err(|e| JobError::Failed(anyhow::Error::new(e)))?;
        Ok(())
    }
}

use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, instrument};

use crate::db::timestamp;
use crate::error::{ContentError, Result};
use crate::types::{AgeGroup, Category, NewCategory, NewTask};

/// Read-only category access used by content generation.
pub trait CategoryLookup: Send + Sync {
    /// Active, non-deleted categories in id order.
    fn find_active_categories(&self) -> Result<Vec<Category>>;

    /// A single active category.
    fn find_category(&self, id: i64) -> Result<Category>;
}

/// Write access for generated truths and dares.
pub trait ContentStore: Send + Sync {
    fn create_item(&self, item: &NewTask) -> Result<()>;
}

/// SQLite-backed catalog.
///
/// Wraps its own connection in a `Mutex`; open one connection per subsystem
/// against the same database file.
pub struct SqliteContentStore {
    db: Mutex<Connection>,
}

impl SqliteContentStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    #[instrument(skip(self, category), fields(label = %category.label))]
    pub fn create_category(&self, category: &NewCategory) -> Result<i64> {
        let db = self.db.lock().unwrap();
        let now = timestamp(Utc::now());
        db.execute(
            "INSERT INTO categories
             (label, age_group, requires_consent, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, 1, ?4, ?4)",
            rusqlite::params![
                category.label,
                category.age_group.to_string(),
                category.requires_consent,
                now
            ],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// Mark a category inactive without deleting it.
    pub fn set_category_active(&self, id: i64, active: bool) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE categories SET is_active = ?1, updated_at = ?2
             WHERE id = ?3 AND deleted_at IS NULL",
            rusqlite::params![active, timestamp(Utc::now()), id],
        )?;
        if n == 0 {
            return Err(ContentError::CategoryNotFound { id });
        }
        Ok(())
    }

    /// Soft-delete a category; the row stays until the retention job purges it.
    pub fn soft_delete_category(&self, id: i64) -> Result<()> {
        let db = self.db.lock().unwrap();
        let now = timestamp(Utc::now());
        let n = db.execute(
            "UPDATE categories SET deleted_at = ?1, updated_at = ?1
             WHERE id = ?2 AND deleted_at IS NULL",
            rusqlite::params![now, id],
        )?;
        if n == 0 {
            return Err(ContentError::CategoryNotFound { id });
        }
        Ok(())
    }

    /// Number of live tasks in a category.
    pub fn count_tasks(&self, category_id: i64) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let n: i64 = db.query_row(
            "SELECT COUNT(*) FROM tasks WHERE category_id = ?1 AND deleted_at IS NULL",
            [category_id],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }
}

impl CategoryLookup for SqliteContentStore {
    #[instrument(skip(self))]
    fn find_active_categories(&self) -> Result<Vec<Category>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, label, age_group, requires_consent
             FROM categories
             WHERE is_active = 1 AND deleted_at IS NULL
             ORDER BY id",
        )?;
        let categories = stmt
            .query_map([], row_to_category)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        debug!(count = categories.len(), "active categories loaded");
        Ok(categories)
    }

    fn find_category(&self, id: i64) -> Result<Category> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT id, label, age_group, requires_consent
             FROM categories
             WHERE id = ?1 AND is_active = 1 AND deleted_at IS NULL",
            [id],
            row_to_category,
        )
        .optional()?
        .ok_or(ContentError::CategoryNotFound { id })
    }
}

impl ContentStore for SqliteContentStore {
    fn create_item(&self, item: &NewTask) -> Result<()> {
        let text = item.text.trim();
        if text.is_empty() {
            return Err(ContentError::InvalidValue("empty task text".to_string()));
        }

        let db = self.db.lock().unwrap();
        let now = timestamp(Utc::now());
        db.execute(
            "INSERT INTO tasks
             (category_id, kind, language, age_group, text, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            rusqlite::params![
                item.category_id,
                item.kind.to_string(),
                item.language.code(),
                item.age_group.to_string(),
                text,
                now
            ],
        )?;
        Ok(())
    }
}

fn row_to_category(row: &rusqlite::Row<'_>) -> rusqlite::Result<Category> {
    let age: String = row.get(2)?;
    let age_group = age.parse::<AgeGroup>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            Box::new(ContentError::InvalidValue(e)),
        )
    })?;
    Ok(Category {
        id: row.get(0)?,
        label: row.get(1)?,
        age_group,
        requires_consent: row.get(3)?,
    })
}

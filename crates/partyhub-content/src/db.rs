use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

use crate::error::Result;

/// Content tables, in the order the retention job purges them.
pub const CONTENT_TABLES: [&str; 2] = ["tasks", "categories"];

/// Initialise the catalog tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_categories_table(conn)?;
    create_tasks_table(conn)?;
    Ok(())
}

/// Canonical timestamp format for every `*_at` column.
///
/// Fixed-width UTC with a `Z` suffix, so text comparison in SQL matches
/// chronological order.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn create_categories_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS categories (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            label             TEXT    NOT NULL,
            age_group         TEXT    NOT NULL,   -- kids | teen | adults
            requires_consent  INTEGER NOT NULL DEFAULT 0,
            is_active         INTEGER NOT NULL DEFAULT 1,
            created_at        TEXT    NOT NULL,
            updated_at        TEXT    NOT NULL,
            deleted_at        TEXT                -- soft delete marker
        );
        CREATE INDEX IF NOT EXISTS idx_categories_deleted
            ON categories(deleted_at);",
    )?;
    Ok(())
}

/// Truths and dares share one table, told apart by `kind`.
fn create_tasks_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tasks (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            category_id INTEGER NOT NULL,
            kind        TEXT    NOT NULL,         -- truth | dare
            language    TEXT    NOT NULL,
            age_group   TEXT    NOT NULL,
            text        TEXT    NOT NULL,
            created_at  TEXT    NOT NULL,
            updated_at  TEXT    NOT NULL,
            deleted_at  TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_category
            ON tasks(category_id, language);
        CREATE INDEX IF NOT EXISTS idx_tasks_deleted
            ON tasks(deleted_at);",
    )?;
    Ok(())
}

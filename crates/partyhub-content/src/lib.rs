//! `partyhub-content`: the truth/dare catalog stored in SQLite.
//!
//! Rows are never deleted directly by the catalog: `deleted_at` marks them as
//! soft-deleted and the retention job purges them later.

pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use error::{ContentError, Result};
pub use store::{CategoryLookup, ContentStore, SqliteContentStore};
pub use types::{AgeGroup, Category, Language, NewCategory, NewTask, TaskKind};

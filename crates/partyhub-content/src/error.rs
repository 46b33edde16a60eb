use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("category not found: {id}")]
    CategoryNotFound { id: i64 },

    #[error("invalid value: {0}")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, ContentError>;

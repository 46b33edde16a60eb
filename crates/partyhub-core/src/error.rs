use thiserror::Error;

#[derive(Debug, Error)]
pub enum PartyhubError {
    /// The config file or an env override could not be parsed.
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PartyhubError>;

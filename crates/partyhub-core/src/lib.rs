//! `partyhub-core`: configuration and shared error types for the partyhub
//! job subsystem.

pub mod config;
pub mod error;

pub use config::PartyhubConfig;
pub use error::{PartyhubError, Result};

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_ADMIN_PORT: u16 = 8787;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_INTER_COMBINATION_DELAY_MS: u64 = 500;

/// Top-level config (partyhub.toml + PARTYHUB_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PartyhubConfig {
    pub database: DatabaseConfig,
    pub provider: ProviderConfig,
    pub prompts: PromptsConfig,
    pub scheduler: SchedulerConfig,
    pub jobs: JobsConfig,
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// OpenAI-compatible endpoint used for content generation.
///
/// The provider reports itself unconfigured when `api_key` is missing or
/// empty; the generation job then skips its runs instead of failing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    /// Directory holding `<template>.md` files. Built-in templates are used
    /// for any name not found here.
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How long `stop` waits for in-flight runs before cancelling them.
    pub drain_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: DEFAULT_DRAIN_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub generation: GenerationJobConfig,
    pub cleanup: CleanupJobConfig,
}

/// Delay growth between retries of one combination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// Same delay before every retry.
    #[default]
    Fixed,
    /// Delay doubles after every retry (capped at 16x the base delay).
    Exponential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationJobConfig {
    pub enabled: bool,
    pub schedule: String,
    /// Maximum attempts per combination (including the first one).
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub backoff: BackoffKind,
    /// Truths and dares requested per (category, language) combination.
    pub count_per_combination: u32,
    /// Upper bound on the count an on-demand request may ask for.
    pub max_count_per_request: u32,
    pub inter_combination_delay_ms: u64,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationJobConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: "0 3 * * *".to_string(),
            max_retries: 3,
            retry_delay_secs: 5,
            backoff: BackoffKind::Fixed,
            count_per_combination: 5,
            max_count_per_request: 50,
            inter_combination_delay_ms: DEFAULT_INTER_COMBINATION_DELAY_MS,
            temperature: 0.9,
            max_tokens: 4000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupJobConfig {
    pub enabled: bool,
    pub schedule: String,
    /// Soft-deleted rows older than this many months are purged.
    pub retention_months: u32,
}

impl Default for CleanupJobConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: "0 4 * * Sun".to_string(),
            retention_months: 6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// When false the admin HTTP listener is not started.
    pub enabled: bool,
    pub bind: String,
    pub port: u16,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_ADMIN_PORT,
        }
    }
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.partyhub/partyhub.db", home)
}

impl PartyhubConfig {
    /// Load config from a TOML file with PARTYHUB_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `PARTYHUB_JOBS__CLEANUP__RETENTION_MONTHS=12`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: PartyhubConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("PARTYHUB_").split("__"))
            .extract()
            .map_err(|e| crate::error::PartyhubError::Config(e.to_string()))?;

        tracing::debug!(path = %path, "configuration loaded");
        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.partyhub/partyhub.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_without_file() {
        let cfg = PartyhubConfig::load(Some("/nonexistent/partyhub.toml")).unwrap();
        assert_eq!(cfg.jobs.cleanup.retention_months, 6);
        assert_eq!(cfg.jobs.generation.max_retries, 3);
        assert_eq!(cfg.jobs.generation.backoff, BackoffKind::Fixed);
        assert_eq!(cfg.scheduler.drain_timeout_secs, DEFAULT_DRAIN_TIMEOUT_SECS);
    }

    #[test]
    fn toml_overrides_nested_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[jobs.generation]
enabled = false
schedule = "*/10 * * * *"
backoff = "exponential"

[jobs.cleanup]
retention_months = 12
"#
        )
        .unwrap();

        let cfg = PartyhubConfig::load(file.path().to_str()).unwrap();
        assert!(!cfg.jobs.generation.enabled);
        assert_eq!(cfg.jobs.generation.schedule, "*/10 * * * *");
        assert_eq!(cfg.jobs.generation.backoff, BackoffKind::Exponential);
        // untouched fields keep their defaults
        assert_eq!(cfg.jobs.generation.count_per_combination, 5);
        assert_eq!(cfg.jobs.generation.max_count_per_request, 50);
        assert_eq!(cfg.jobs.cleanup.retention_months, 12);
        assert!(cfg.jobs.cleanup.enabled);
    }
}

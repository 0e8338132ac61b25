use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Application configuration (§6). Loaded from a TOML file; `start_dt` may
/// additionally be overridden by the `PORTALWATCH_START_DT` environment
/// variable for deterministic testing, layering an environment override on
/// top of the file's defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Root URL of the video portal (e.g. `https://www.video.example.ch`).
    pub portal_root: String,

    /// Allow-listed top-level path prefixes the Site Indexer will follow
    /// (§4.5), e.g. `["/campus", "/conferences", "/events", "/speakers",
    /// "/lectures"]`.
    pub allowed_prefixes: Vec<String>,

    /// Concurrency for fetchers (§6 `workers`).
    pub workers: usize,

    /// If true, record bodies are base64-encoded at rest (§6 `use_base64`).
    #[serde(default)]
    pub use_base64: bool,

    /// Location of the store file (§6 `db_path`).
    pub db_path: String,

    /// Copy the store file before running (§6 `backup`).
    #[serde(default)]
    pub backup: bool,

    /// Override the epoch timestamp for deterministic testing (§6
    /// `start_dt`). If absent, the controller uses `Utc::now()`.
    #[serde(default)]
    pub start_dt: Option<DateTime<Utc>>,

    pub credentials: Credentials,

    #[serde(default)]
    pub queue: QueueConfig,
}

/// Credential Resolver configuration (§4.4).
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub global: LoginCredential,
    #[serde(default)]
    pub per_path: Vec<PathOverride>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginCredential {
    pub user: String,
    pub pass: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathOverride {
    pub url_prefix: String,
    pub user: String,
    pub pass: String,
}

/// Worker pool and stage-timeout knobs (§4.2, §5).
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_task_capacity")]
    pub task_capacity: usize,
    #[serde(default = "default_result_capacity")]
    pub result_capacity: usize,
    #[serde(default = "default_idle_max_secs")]
    pub idle_max_secs: u64,
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

fn default_task_capacity() -> usize {
    256
}
fn default_result_capacity() -> usize {
    256
}
fn default_idle_max_secs() -> u64 {
    20
}
fn default_drain_timeout_secs() -> u64 {
    300
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            task_capacity: default_task_capacity(),
            result_capacity: default_result_capacity(),
            idle_max_secs: default_idle_max_secs(),
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, applying environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("failed to read config {}: {e}", path.as_ref().display()))?;
        let mut config: Config = toml::from_str(&text)?;

        if let Ok(raw) = std::env::var("PORTALWATCH_START_DT") {
            config.start_dt = Some(
                DateTime::parse_from_rfc3339(&raw)
                    .map_err(|e| anyhow::anyhow!("PORTALWATCH_START_DT must be RFC3339: {e}"))?
                    .with_timezone(&Utc),
            );
        }

        if config.workers == 0 {
            anyhow::bail!("workers must be greater than 0");
        }

        Ok(config)
    }

    /// The timestamp identifying the current crawl epoch (`T0`, §1).
    pub fn epoch_timestamp(&self) -> DateTime<Utc> {
        self.start_dt.unwrap_or_else(Utc::now)
    }

    /// Log the non-secret fields only; passwords never reach the logs.
    pub fn log_redacted(&self) {
        tracing::info!(portal_root = %self.portal_root, workers = self.workers, "configuration loaded");
        tracing::info!(
            global_user = %self.credentials.global.user,
            per_path_overrides = self.credentials.per_path.len(),
            "credential resolver configured"
        );
    }
}

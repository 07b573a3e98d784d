//! Data room client configuration
//!
//! One YAML file with sections for tree sync timeouts, retry, upload
//! progress, local storage, the acting identity and logging.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration.
///
/// Every section has defaults, so a YAML file only needs the keys it changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub retry: RetryConfig,
    pub upload: UploadConfig,
    pub storage: StorageConfig,
    pub identity: IdentityConfig,
    pub logging: LoggingConfig,
}

/// Tree synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Deadline for a full refresh of the root folder list (seconds).
    pub refresh_timeout_secs: u64,
    /// Deadline for loading one folder's children (seconds).
    pub subtree_timeout_secs: u64,
    /// Minimum time hidden before becoming visible again triggers a refresh (seconds).
    pub idle_refresh_secs: u64,
}

/// Retry settings for remote store calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt for transient failures.
    pub max_retries: u32,
    /// Backoff before retry N is `base_delay_ms * 2^(N-1)`.
    pub base_delay_ms: u64,
}

/// Upload coordinator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Interval between progress-estimate ticks (milliseconds).
    pub progress_tick_ms: u64,
    /// The estimate never exceeds this share of a file's size (percent).
    pub estimate_cap_percent: u8,
}

/// Local storage backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database holding folder/file records.
    pub database: PathBuf,
    /// Directory holding file blobs.
    pub blob_root: PathBuf,
    /// Lifetime of signed retrieval URLs (seconds).
    pub signed_url_ttl_secs: u64,
    /// Secret mixed into retrieval-URL signatures. `None` signs with an empty secret.
    pub signing_secret: Option<String>,
}

/// Acting user of the local session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub user_id: String,
    pub is_admin: bool,
}

/// `tracing` filter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter level when `RUST_LOG` is unset.
    pub level: String,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Reads and parses the YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Like [`Config::load`], but any failure yields the defaults.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Where the CLI looks when `--config` is not given:
    /// usually `$XDG_CONFIG_HOME/dataroom/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("dataroom")
            .join("config.yaml")
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            refresh_timeout_secs: 15,
            subtree_timeout_secs: 8,
            idle_refresh_secs: 60,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            progress_tick_ms: 250,
            estimate_cap_percent: 90,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("dataroom");
        Self {
            database: data_dir.join("dataroom.db"),
            blob_root: data_dir.join("blobs"),
            signed_url_ttl_secs: 3600,
            signing_secret: None,
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            user_id: std::env::var("USER").unwrap_or_else(|_| "local".to_string()),
            is_admin: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.refresh_timeout_secs"`.
    pub field: String,
    /// What is wrong with the value.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Upper bound for `retry.max_retries`.
const MAX_RETRIES_LIMIT: u32 = 10;

impl Config {
    /// Collects every problem in the configuration; empty means usable.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut positive = |field: &str, value: u64| {
            if value == 0 {
                errors.push(ValidationError {
                    field: field.into(),
                    message: "must be greater than 0".into(),
                });
            }
        };

        // --- sync ---
        positive("sync.refresh_timeout_secs", self.sync.refresh_timeout_secs);
        positive("sync.subtree_timeout_secs", self.sync.subtree_timeout_secs);
        positive("sync.idle_refresh_secs", self.sync.idle_refresh_secs);

        // --- retry / upload ---
        positive("retry.base_delay_ms", self.retry.base_delay_ms);
        positive("upload.progress_tick_ms", self.upload.progress_tick_ms);
        positive("storage.signed_url_ttl_secs", self.storage.signed_url_ttl_secs);

        if self.sync.subtree_timeout_secs > self.sync.refresh_timeout_secs {
            errors.push(ValidationError {
                field: "sync.subtree_timeout_secs".into(),
                message: format!(
                    "subtree_timeout_secs ({}) must not exceed refresh_timeout_secs ({})",
                    self.sync.subtree_timeout_secs, self.sync.refresh_timeout_secs
                ),
            });
        }

        if self.retry.max_retries > MAX_RETRIES_LIMIT {
            errors.push(ValidationError {
                field: "retry.max_retries".into(),
                message: format!("must be at most {MAX_RETRIES_LIMIT}"),
            });
        }

        if self.upload.estimate_cap_percent == 0 || self.upload.estimate_cap_percent > 100 {
            errors.push(ValidationError {
                field: "upload.estimate_cap_percent".into(),
                message: "must be in range 1..=100".into(),
            });
        }

        // --- identity ---
        if self.identity.user_id.trim().is_empty() {
            errors.push(ValidationError {
                field: "identity.user_id".into(),
                message: "must not be empty".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Programmatic overrides on top of [`Config::default`], mostly for tests
/// and embedding.
///
/// # Example
///
/// ```rust
/// use dataroom_core::config::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .refresh_timeout_secs(30)
///     .identity("alice", false)
///     .build();
/// assert_eq!(config.identity.user_id, "alice");
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Starts from the defaults.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- sync ---

    pub fn refresh_timeout_secs(mut self, seconds: u64) -> Self {
        self.config.sync.refresh_timeout_secs = seconds;
        self
    }

    pub fn subtree_timeout_secs(mut self, seconds: u64) -> Self {
        self.config.sync.subtree_timeout_secs = seconds;
        self
    }

    pub fn idle_refresh_secs(mut self, seconds: u64) -> Self {
        self.config.sync.idle_refresh_secs = seconds;
        self
    }

    // --- retry ---

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.retry.max_retries = n;
        self
    }

    pub fn base_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry.base_delay_ms = ms;
        self
    }

    // --- upload ---

    pub fn progress_tick_ms(mut self, ms: u64) -> Self {
        self.config.upload.progress_tick_ms = ms;
        self
    }

    // --- storage ---

    pub fn database(mut self, path: PathBuf) -> Self {
        self.config.storage.database = path;
        self
    }

    pub fn blob_root(mut self, path: PathBuf) -> Self {
        self.config.storage.blob_root = path;
        self
    }

    pub fn signing_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.storage.signing_secret = Some(secret.into());
        self
    }

    // --- identity ---

    pub fn identity(mut self, user_id: impl Into<String>, is_admin: bool) -> Self {
        self.config.identity.user_id = user_id.into();
        self.config.identity.is_admin = is_admin;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// Finishes the builder.
    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

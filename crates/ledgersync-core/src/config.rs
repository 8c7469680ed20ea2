//! Configuration module for ledgersync.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::backoff::{BackoffPolicy, DEFAULT_INITIAL_DELAY_MS, DEFAULT_MAX_DELAY_MS};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for ledgersync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub sharding: ShardingConfig,
    pub locking: LockingConfig,
    pub backoff: BackoffConfig,
    pub ledgers: LedgersConfig,
    pub state: StateConfig,
    pub logging: LoggingConfig,
}

/// Remote store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend kind. Only `local` (a local or network-mounted directory) ships today.
    pub backend: String,
    /// Root directory of the remote store.
    pub root: PathBuf,
    /// Name under which lock hints and backoff state of this backend are kept.
    pub scope: String,
}

/// Change log sharding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardingConfig {
    /// Change files per shard before rolling over to the next one.
    pub capacity: u64,
}

/// Remote lock settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockingConfig {
    /// Age (in seconds) after which another device may take over a lock.
    pub timeout_secs: u64,
}

/// Backoff after remote failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Quiet period after the first failure (milliseconds).
    pub initial_delay_ms: i64,
    /// Upper bound of the quiet period (milliseconds).
    pub max_delay_ms: i64,
}

/// Defaults applied to ledgers read from the remote store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgersConfig {
    /// Currency assumed for legacy ledger folders that do not record one.
    pub home_currency: String,
}

/// Local state persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// SQLite database holding cursors, the outbox, lock hints and backoff state.
    pub database: PathBuf,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/ledgersync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("ledgersync")
            .join("config.yaml")
    }

    /// Lock timeout in milliseconds.
    pub fn lock_timeout_ms(&self) -> i64 {
        i64::try_from(self.locking.timeout_secs.saturating_mul(1000)).unwrap_or(i64::MAX)
    }

    /// Backoff policy built from the `backoff` section.
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.backoff.initial_delay_ms, self.backoff.max_delay_ms)
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("~/.local/share"))
        .join("ledgersync")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "local".to_string(),
            root: data_dir().join("remote"),
            scope: "default".to_string(),
        }
    }
}

impl Default for ShardingConfig {
    fn default() -> Self {
        Self { capacity: 100 }
    }
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self { timeout_secs: 1800 }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl Default for LedgersConfig {
    fn default() -> Self {
        Self {
            home_currency: "EUR".to_string(),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            database: data_dir().join("state.db"),
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
    /// Dotted path to the offending field, e.g. `"sharding.capacity"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `storage.backend`.
const VALID_BACKENDS: &[&str] = &["local"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- storage ---
        if !VALID_BACKENDS.contains(&self.storage.backend.as_str()) {
            errors.push(ValidationError {
                field: "storage.backend".into(),
                message: format!(
                    "invalid backend '{}'; valid options: {}",
                    self.storage.backend,
                    VALID_BACKENDS.join(", ")
                ),
            });
        }
        if self.storage.scope.trim().is_empty() {
            errors.push(ValidationError {
                field: "storage.scope".into(),
                message: "must not be empty".into(),
            });
        }

        // --- sharding ---
        if self.sharding.capacity == 0 {
            errors.push(ValidationError {
                field: "sharding.capacity".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- locking ---
        if self.locking.timeout_secs == 0 {
            errors.push(ValidationError {
                field: "locking.timeout_secs".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- backoff ---
        if self.backoff.initial_delay_ms <= 0 {
            errors.push(ValidationError {
                field: "backoff.initial_delay_ms".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.backoff.max_delay_ms < self.backoff.initial_delay_ms {
            errors.push(ValidationError {
                field: "backoff.max_delay_ms".into(),
                message: format!(
                    "max_delay_ms ({}) must not be below initial_delay_ms ({})",
                    self.backoff.max_delay_ms, self.backoff.initial_delay_ms
                ),
            });
        }

        // --- ledgers ---
        let currency = &self.ledgers.home_currency;
        if currency.len() != 3 || !currency.bytes().all(|b| b.is_ascii_uppercase()) {
            errors.push(ValidationError {
                field: "ledgers.home_currency".into(),
                message: format!("not an ISO 4217 code: '{currency}'"),
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

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use ledgersync_core::config::ConfigBuilder;
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .storage_root(PathBuf::from("/mnt/nas/ledgers"))
///     .sharding_capacity(50)
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- storage ---

    pub fn storage_backend(mut self, backend: impl Into<String>) -> Self {
        self.config.storage.backend = backend.into();
        self
    }

    pub fn storage_root(mut self, root: PathBuf) -> Self {
        self.config.storage.root = root;
        self
    }

    pub fn storage_scope(mut self, scope: impl Into<String>) -> Self {
        self.config.storage.scope = scope.into();
        self
    }

    // --- sharding / locking / backoff ---

    pub fn sharding_capacity(mut self, capacity: u64) -> Self {
        self.config.sharding.capacity = capacity;
        self
    }

    pub fn locking_timeout_secs(mut self, seconds: u64) -> Self {
        self.config.locking.timeout_secs = seconds;
        self
    }

    pub fn backoff_initial_delay_ms(mut self, ms: i64) -> Self {
        self.config.backoff.initial_delay_ms = ms;
        self
    }

    pub fn backoff_max_delay_ms(mut self, ms: i64) -> Self {
        self.config.backoff.max_delay_ms = ms;
        self
    }

    // --- ledgers ---

    pub fn home_currency(mut self, currency: impl Into<String>) -> Self {
        self.config.ledgers.home_currency = currency.into();
        self
    }

    // --- state ---

    pub fn state_database(mut self, path: PathBuf) -> Self {
        self.config.state.database = path;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    // -- Defaults --

    #[test]
    fn default_config_has_sensible_values() {
        let cfg = Config::default();
        assert_eq!(cfg.storage.backend, "local");
        assert_eq!(cfg.storage.scope, "default");
        assert!(cfg.storage.root.to_string_lossy().contains("ledgersync"));
        assert_eq!(cfg.sharding.capacity, 100);
        assert_eq!(cfg.locking.timeout_secs, 1800);
        assert_eq!(cfg.lock_timeout_ms(), 1_800_000);
        assert_eq!(cfg.backoff.initial_delay_ms, 5_000);
        assert_eq!(cfg.backoff.max_delay_ms, 3_600_000);
        assert_eq!(cfg.ledgers.home_currency, "EUR");
        assert!(cfg.state.database.ends_with("state.db"));
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn default_config_passes_validation() {
        let errors = Config::default().validate();
        assert!(errors.is_empty(), "unexpected validation errors: {errors:?}");
    }

    // -- Loading --

    #[test]
    fn load_from_yaml_file() {
        let yaml = r#"
storage:
  backend: local
  root: /mnt/nas/ledgers
  scope: nas
sharding:
  capacity: 20
locking:
  timeout_secs: 600
backoff:
  initial_delay_ms: 1000
  max_delay_ms: 60000
ledgers:
  home_currency: CHF
state:
  database: /tmp/ledgersync-state.db
logging:
  level: debug
"#;
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(yaml.as_bytes()).unwrap();
        tmp.flush().unwrap();

        let cfg = Config::load(tmp.path()).expect("load config");
        assert_eq!(cfg.storage.root, PathBuf::from("/mnt/nas/ledgers"));
        assert_eq!(cfg.storage.scope, "nas");
        assert_eq!(cfg.sharding.capacity, 20);
        assert_eq!(cfg.locking.timeout_secs, 600);
        assert_eq!(cfg.backoff_policy(), BackoffPolicy::new(1000, 60000));
        assert_eq!(cfg.ledgers.home_currency, "CHF");
        assert_eq!(cfg.state.database, PathBuf::from("/tmp/ledgersync-state.db"));
        assert_eq!(cfg.logging.level, "debug");
    }

    #[test]
    fn load_partial_yaml_fills_defaults() {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(b"sharding:\n  capacity: 7\n").unwrap();
        tmp.flush().unwrap();

        let cfg = Config::load(tmp.path()).expect("load config");
        assert_eq!(cfg.sharding.capacity, 7);
        assert_eq!(cfg.locking.timeout_secs, 1800);
        assert_eq!(cfg.storage.backend, "local");
    }

    #[test]
    fn load_or_default_returns_default_on_missing_file() {
        let cfg = Config::load_or_default(Path::new("/nonexistent/config.yaml"));
        assert_eq!(cfg.sharding.capacity, 100);
    }

    #[test]
    fn load_returns_error_on_invalid_yaml() {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(b"not: [valid: yaml: {{{").unwrap();
        tmp.flush().unwrap();

        let result = Config::load(tmp.path());
        assert!(result.is_err());
    }

    // -- Validation --

    #[test]
    fn validate_catches_zero_values() {
        let mut cfg = Config::default();
        cfg.sharding.capacity = 0;
        cfg.locking.timeout_secs = 0;
        cfg.backoff.initial_delay_ms = 0;
        let errors = cfg.validate();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"sharding.capacity"));
        assert!(fields.contains(&"locking.timeout_secs"));
        assert!(fields.contains(&"backoff.initial_delay_ms"));
    }

    #[test]
    fn validate_catches_inverted_backoff_bounds() {
        let mut cfg = Config::default();
        cfg.backoff.max_delay_ms = 10;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "backoff.max_delay_ms"));
    }

    #[test]
    fn validate_catches_unknown_backend_and_level() {
        let mut cfg = Config::default();
        cfg.storage.backend = "ftp".into();
        cfg.logging.level = "verbose".into();
        cfg.ledgers.home_currency = "euro".into();
        let errors = cfg.validate();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"storage.backend"));
        assert!(fields.contains(&"logging.level"));
        assert!(fields.contains(&"ledgers.home_currency"));
    }

    #[test]
    fn validation_error_display() {
        let err = ValidationError {
            field: "sharding.capacity".into(),
            message: "must be greater than 0".into(),
        };
        assert_eq!(err.to_string(), "sharding.capacity: must be greater than 0");
    }

    // -- Builder --

    #[test]
    fn builder_overrides_and_validates() {
        let cfg = ConfigBuilder::new()
            .storage_root(PathBuf::from("/srv/ledgers"))
            .storage_scope("srv")
            .sharding_capacity(3)
            .locking_timeout_secs(60)
            .home_currency("USD")
            .logging_level("warn")
            .build_validated()
            .expect("valid config");
        assert_eq!(cfg.storage.root, PathBuf::from("/srv/ledgers"));
        assert_eq!(cfg.sharding.capacity, 3);
        assert_eq!(cfg.lock_timeout_ms(), 60_000);
        assert_eq!(cfg.ledgers.home_currency, "USD");
    }

    #[test]
    fn builder_build_validated_reports_errors() {
        let result = ConfigBuilder::new()
            .backoff_initial_delay_ms(100)
            .backoff_max_delay_ms(50)
            .build_validated();
        let errors = result.unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "backoff.max_delay_ms");
    }
}

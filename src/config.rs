//! Engine configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via AQUACLEAN_CONFIG)
//! 3. Environment variables

use aquaclean_client::{Session, SessionConfig, Transport, Verbosity};
use aquaclean_core::{CapabilityTable, CoreError, DataPointId, DataPointRegistry};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Protocol timing and limits.
    pub session: SessionSettings,
    /// External data point and capability tables.
    pub tables: TableConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("AQUACLEAN_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from a variable lookup.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        self.session.apply_overrides(&var);
        self.tables.apply_overrides(&var);
        self.logging.apply_overrides(&var);
    }

    /// Checks values the protocol cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let session = &self.session;
        if session.mtu <= 4 {
            return Err(ConfigError::ValidationError(format!(
                "mtu of {} bytes leaves no room for payload",
                session.mtu
            )));
        }
        if session.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if session.response_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "response_timeout_ms must be positive".to_string(),
            ));
        }
        if session.initial_backoff_ms > session.max_backoff_ms {
            return Err(ConfigError::ValidationError(
                "initial_backoff_ms exceeds max_backoff_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the client-side session configuration.
    pub fn session_config(&self) -> SessionConfig {
        let s = &self.session;
        SessionConfig::new()
            .with_response_timeout(Duration::from_millis(s.response_timeout_ms))
            .with_max_attempts(s.max_attempts)
            .with_backoff(
                Duration::from_millis(s.initial_backoff_ms),
                s.backoff_multiplier,
                Duration::from_millis(s.max_backoff_ms),
            )
            .with_mtu(s.mtu)
            .with_max_message_size(s.max_message_size)
            .with_max_pending_age(Duration::from_millis(s.max_pending_age_ms))
            .with_event_capacity(s.event_capacity)
            .with_model_data_point(DataPointId(s.model_data_point))
            .with_verbosity(self.logging.verbosity)
    }

    /// Builds a session over `transport` with the configured tables.
    pub fn build_session<T: Transport>(&self, transport: T) -> Result<Session<T>, ConfigError> {
        let registry = self.tables.load_registry()?;
        let capabilities = self.tables.load_capabilities()?;
        capabilities
            .check_against(&registry)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        tracing::info!(
            data_points = registry.len(),
            "Building session (mtu {}, timeout {} ms)",
            self.session.mtu,
            self.session.response_timeout_ms
        );
        Ok(Session::new(
            transport,
            self.session_config(),
            Arc::new(registry),
            Arc::new(capabilities),
        ))
    }
}

/// Protocol timing and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Time to wait for each response in milliseconds.
    pub response_timeout_ms: u64,
    /// Sends per request, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds.
    pub initial_backoff_ms: u64,
    /// Factor applied to the delay for each further retry.
    pub backoff_multiplier: u32,
    /// Upper bound on the retry delay in milliseconds.
    pub max_backoff_ms: u64,
    /// Transport MTU in bytes.
    pub mtu: usize,
    /// Largest reassembled message in bytes.
    pub max_message_size: usize,
    /// Unfinished messages older than this are dropped (milliseconds).
    pub max_pending_age_ms: u64,
    /// Capacity of the state change channel.
    pub event_capacity: usize,
    /// Data point holding the model identifier.
    pub model_data_point: u16,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        Self {
            response_timeout_ms: defaults.response_timeout.as_millis() as u64,
            max_attempts: defaults.max_attempts,
            initial_backoff_ms: defaults.initial_backoff.as_millis() as u64,
            backoff_multiplier: defaults.backoff_multiplier,
            max_backoff_ms: defaults.max_backoff.as_millis() as u64,
            mtu: defaults.mtu,
            max_message_size: defaults.max_message_size,
            max_pending_age_ms: defaults.max_pending_age.as_millis() as u64,
            event_capacity: defaults.event_capacity,
            model_data_point: defaults.model_data_point.value(),
        }
    }
}

impl SessionSettings {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(ms) = var("AQUACLEAN_RESPONSE_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.response_timeout_ms = ms;
        }
        if let Some(n) = var("AQUACLEAN_MAX_ATTEMPTS").and_then(|v| v.parse().ok()) {
            self.max_attempts = n;
        }
        if let Some(mtu) = var("AQUACLEAN_MTU").and_then(|v| v.parse().ok()) {
            self.mtu = mtu;
        }
    }
}

/// External tables. Files ending in `.json` are read as JSON, anything
/// else as YAML. Unset paths use the built-in tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    pub data_points: Option<PathBuf>,
    pub capabilities: Option<PathBuf>,
}

impl TableConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(path) = var("AQUACLEAN_DATA_POINTS") {
            self.data_points = Some(PathBuf::from(path));
        }
        if let Some(path) = var("AQUACLEAN_CAPABILITIES") {
            self.capabilities = Some(PathBuf::from(path));
        }
    }

    pub fn load_registry(&self) -> Result<DataPointRegistry, ConfigError> {
        match &self.data_points {
            Some(path) => load_table(path, DataPointRegistry::from_json, DataPointRegistry::from_yaml),
            None => DataPointRegistry::builtin().map_err(ConfigError::Builtin),
        }
    }

    pub fn load_capabilities(&self) -> Result<CapabilityTable, ConfigError> {
        match &self.capabilities {
            Some(path) => load_table(path, CapabilityTable::from_json, CapabilityTable::from_yaml),
            None => CapabilityTable::builtin().map_err(ConfigError::Builtin),
        }
    }
}

fn load_table<T>(
    path: &Path,
    from_json: fn(&str) -> Result<T, CoreError>,
    from_yaml: fn(&str) -> Result<T, CoreError>,
) -> Result<T, ConfigError> {
    let content =
        std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
    let is_json = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("json"));
    let parse = if is_json { from_json } else { from_yaml };
    let table = parse(&content).map_err(|e| ConfigError::Table(path.to_path_buf(), e))?;
    tracing::debug!("Loaded table {}", path.display());
    Ok(table)
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub verbosity: Verbosity,
}

impl LoggingConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(level) = var("AQUACLEAN_LOG") {
            match parse_verbosity(&level) {
                Some(verbosity) => self.verbosity = verbosity,
                None => tracing::warn!("Ignoring unknown AQUACLEAN_LOG value '{}'", level),
            }
        }
    }
}

fn parse_verbosity(value: &str) -> Option<Verbosity> {
    match value.trim().to_ascii_lowercase().as_str() {
        "quiet" | "warn" => Some(Verbosity::Quiet),
        "normal" | "info" => Some(Verbosity::Normal),
        "debug" => Some(Verbosity::Debug),
        "trace" => Some(Verbosity::Trace),
        _ => None,
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read '{}': {1}", .0.display())]
    IoError(PathBuf, std::io::Error),

    #[error("failed to parse config file '{}': {1}", .0.display())]
    ParseError(PathBuf, String),

    #[error("invalid table '{}': {1}", .0.display())]
    Table(PathBuf, CoreError),

    #[error("built-in table is invalid: {0}")]
    Builtin(CoreError),

    #[error("invalid configuration: {0}")]
    ValidationError(String),
}

//! Service configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use fotohora_core::{
    FirebaseStore, MemoryStore, RemoteStore, ReporterOptions, StoreError, StoreResult,
    TimestampSource,
};
use fotohora_types::{Coordinates, DEFAULT_INTERVAL_MILLIS, ReportingConfig, StorePath};

/// Service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device identity settings.
    pub device: DeviceConfig,
    /// Reporter settings.
    pub reporter: ReporterConfig,
    /// Remote store settings.
    pub store: StoreConfig,
    /// Simulated location source settings.
    pub simulation: SimulationConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return every error found.
    ///
    /// # Example
    ///
    /// ```
    /// use fotohora_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.device.validate());
        errors.extend(self.reporter.validate());
        errors.extend(self.store.validate());
        errors.extend(self.simulation.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// Device identity settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Explicit device identity; the host name is used when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl DeviceConfig {
    /// Validate device settings.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if let Some(id) = &self.id
            && id.trim().is_empty()
        {
            errors.push(ValidationError {
                field: "device.id".to_string(),
                message: "device id cannot be empty (omit it to use the host name)".to_string(),
            });
        }
        errors
    }
}

/// Reporter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReporterConfig {
    /// Interval used until the store delivers one, in milliseconds.
    pub default_interval_ms: u64,
    /// Which timestamp reports are keyed by.
    pub timestamp_source: TimestampSource,
    /// Whether location access is granted to the reporter.
    pub location_permission: bool,
    /// Restart the reporter after a subscription failure.
    pub restart_on_failure: bool,
    /// Delay before a restart, in seconds.
    pub restart_delay_secs: u64,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            default_interval_ms: DEFAULT_INTERVAL_MILLIS,
            timestamp_source: TimestampSource::Write,
            location_permission: true,
            restart_on_failure: true,
            restart_delay_secs: 5,
        }
    }
}

/// Minimum restart delay in seconds.
pub const MIN_RESTART_DELAY: u64 = 1;

impl ReporterConfig {
    /// Validate reporter settings.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.default_interval_ms == 0 {
            errors.push(ValidationError {
                field: "reporter.default_interval_ms".to_string(),
                message: "interval must be greater than 0".to_string(),
            });
        } else if i64::try_from(self.default_interval_ms).is_err() {
            errors.push(ValidationError {
                field: "reporter.default_interval_ms".to_string(),
                message: format!("interval {} is too large", self.default_interval_ms),
            });
        }

        if self.restart_delay_secs < MIN_RESTART_DELAY {
            errors.push(ValidationError {
                field: "reporter.restart_delay_secs".to_string(),
                message: format!(
                    "restart delay {} is too short (minimum {} second)",
                    self.restart_delay_secs, MIN_RESTART_DELAY
                ),
            });
        }

        errors
    }

    /// The initial reporting config.
    pub fn reporting_config(&self) -> ReportingConfig {
        i64::try_from(self.default_interval_ms)
            .ok()
            .and_then(ReportingConfig::from_millis)
            .unwrap_or_default()
    }

    /// Reporter options derived from these settings.
    pub fn reporter_options(&self) -> ReporterOptions {
        ReporterOptions {
            initial_config: self.reporting_config(),
            timestamp_source: self.timestamp_source,
            config_path: StorePath::config_interval(),
        }
    }

    /// Delay before a restart.
    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs.max(MIN_RESTART_DELAY))
    }
}

/// Which remote store backs the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Firebase Realtime Database over REST.
    Firebase,
    /// In-process store; nothing leaves the process.
    #[default]
    Memory,
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Firebase => write!(f, "firebase"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

/// Remote store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Store backend.
    pub backend: StoreBackend,
    /// Database URL (firebase backend).
    pub url: String,
    /// Database secret or ID token, sent as the `auth` query parameter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            url: String::new(),
            auth_token: None,
            timeout_secs: 10,
        }
    }
}

impl StoreConfig {
    /// Validate store settings.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.backend == StoreBackend::Firebase {
            if self.url.is_empty() {
                errors.push(ValidationError {
                    field: "store.url".to_string(),
                    message: "URL is required for the firebase backend".to_string(),
                });
            } else if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
                errors.push(ValidationError {
                    field: "store.url".to_string(),
                    message: format!(
                        "invalid URL '{}': must start with http:// or https://",
                        self.url
                    ),
                });
            }
        }

        if self.timeout_secs == 0 {
            errors.push(ValidationError {
                field: "store.timeout_secs".to_string(),
                message: "timeout must be greater than 0".to_string(),
            });
        }

        errors
    }

    /// Open the configured store.
    pub fn open(&self) -> StoreResult<Arc<dyn RemoteStore>> {
        Ok(match self.backend {
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
            StoreBackend::Firebase => Arc::new(FirebaseStore::new(
                &self.url,
                self.auth_token.clone(),
                Duration::from_secs(self.timeout_secs),
            )?),
        })
    }

    /// Open the configured store for viewer operations.
    ///
    /// Viewer operations read what reporters wrote and write what reporters
    /// follow, so they need a store other processes can see. The memory
    /// backend lives and dies with this process and is refused.
    pub fn open_shared(&self) -> Result<Arc<dyn RemoteStore>, ConfigError> {
        match self.backend {
            StoreBackend::Memory => Err(ConfigError::NotShared(self.backend)),
            StoreBackend::Firebase => Ok(self.open()?),
        }
    }
}

/// Simulated location source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Latitude the walk starts from.
    pub origin_lat: f64,
    /// Longitude the walk starts from.
    pub origin_lng: f64,
    /// Distance moved per fix, in meters.
    pub step_meters: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            origin_lat: 4.7110,
            origin_lng: -74.0721,
            step_meters: 25.0,
        }
    }
}

impl SimulationConfig {
    /// Validate simulation settings.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !(-90.0..=90.0).contains(&self.origin_lat) {
            errors.push(ValidationError {
                field: "simulation.origin_lat".to_string(),
                message: format!("latitude {} is out of range [-90, 90]", self.origin_lat),
            });
        }
        if !(-180.0..=180.0).contains(&self.origin_lng) {
            errors.push(ValidationError {
                field: "simulation.origin_lng".to_string(),
                message: format!("longitude {} is out of range [-180, 180]", self.origin_lng),
            });
        }
        if !(self.step_meters >= 0.0 && self.step_meters.is_finite()) {
            errors.push(ValidationError {
                field: "simulation.step_meters".to_string(),
                message: format!("step {} must be a non-negative distance", self.step_meters),
            });
        }

        errors
    }

    /// The walk origin.
    pub fn origin(&self) -> Coordinates {
        Coordinates {
            lat: self.origin_lat,
            lng: self.origin_lng,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
    #[error(
        "The {0} store is not shared with other processes; set store.backend = \"firebase\" or pass --store-url"
    )]
    NotShared(StoreBackend),
    #[error("Failed to open store: {0}")]
    Store(#[from] StoreError),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `store.url`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fotohora")
        .join("reporter.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(config: &Config) -> Vec<String> {
        match config.validate() {
            Ok(()) => Vec::new(),
            Err(ConfigError::Validation(errors)) => errors.into_iter().map(|e| e.field).collect(),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.device.id.is_none());
        assert_eq!(config.reporter.default_interval_ms, 30_000);
        assert_eq!(config.reporter.timestamp_source, TimestampSource::Write);
        assert!(config.reporter.location_permission);
        assert!(config.reporter.restart_on_failure);
        assert_eq!(config.reporter.restart_delay_secs, 5);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.timeout_secs, 10);
        assert_eq!(config.simulation.step_meters, 25.0);
    }

    #[test]
    fn test_default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_config_full_toml() {
        let toml = r#"
            [device]
            id = "truck-7"

            [reporter]
            default_interval_ms = 10000
            timestamp_source = "fix"
            location_permission = false
            restart_on_failure = false
            restart_delay_secs = 30

            [store]
            backend = "firebase"
            url = "https://demo-default-rtdb.firebaseio.com"
            auth_token = "secret"
            timeout_secs = 3

            [simulation]
            origin_lat = 6.2442
            origin_lng = -75.5812
            step_meters = 0.0
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.device.id.as_deref(), Some("truck-7"));
        assert_eq!(config.reporter.timestamp_source, TimestampSource::Fix);
        assert!(!config.reporter.location_permission);
        assert_eq!(config.reporter.restart_delay(), Duration::from_secs(30));
        assert_eq!(config.store.backend, StoreBackend::Firebase);
        assert_eq!(config.store.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.simulation.origin().lat, 6.2442);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str("[reporter]\ndefault_interval_ms = 5000\n").unwrap();
        assert_eq!(config.reporter.default_interval_ms, 5000);
        assert!(config.reporter.restart_on_failure);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(
            config.reporter.reporting_config(),
            ReportingConfig::from_millis(5000).unwrap()
        );
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let result: Result<Config, _> = toml::from_str("[store]\nbackend = \"redis\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("reporter.toml");

        let mut config = Config::default();
        config.device.id = Some("truck-7".to_string());
        config.reporter.timestamp_source = TimestampSource::Fix;
        config.store.backend = StoreBackend::Firebase;
        config.store.url = "https://demo.firebaseio.com".to_string();

        config.save(&config_path).unwrap();
        let loaded = Config::load_validated(&config_path).unwrap();

        assert_eq!(loaded.device.id.as_deref(), Some("truck-7"));
        assert_eq!(loaded.reporter.timestamp_source, TimestampSource::Fix);
        assert_eq!(loaded.store.backend, StoreBackend::Firebase);
        assert_eq!(loaded.store.url, "https://demo.firebaseio.com");
        assert!(loaded.store.auth_token.is_none());
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = Config::load("/nonexistent/path/reporter.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("invalid.toml");
        std::fs::write(&config_path, "this is not valid { toml").unwrap();

        let result = Config::load(&config_path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("fotohora/reporter.toml"));
    }

    #[test]
    fn test_firebase_requires_http_url() {
        let mut config = Config::default();
        config.store.backend = StoreBackend::Firebase;
        assert_eq!(fields(&config), vec!["store.url"]);

        config.store.url = "ftp://example.com".to_string();
        assert_eq!(fields(&config), vec!["store.url"]);

        config.store.url = "http://localhost:9000".to_string();
        assert!(fields(&config).is_empty());
    }

    #[test]
    fn test_memory_backend_ignores_url() {
        let mut config = Config::default();
        config.store.url = "not a url".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_collects_every_error() {
        let mut config = Config::default();
        config.device.id = Some("  ".to_string());
        config.reporter.default_interval_ms = 0;
        config.reporter.restart_delay_secs = 0;
        config.store.timeout_secs = 0;
        config.simulation.origin_lat = 91.0;
        config.simulation.origin_lng = -181.0;
        config.simulation.step_meters = -1.0;

        assert_eq!(
            fields(&config),
            vec![
                "device.id",
                "reporter.default_interval_ms",
                "reporter.restart_delay_secs",
                "store.timeout_secs",
                "simulation.origin_lat",
                "simulation.origin_lng",
                "simulation.step_meters",
            ]
        );
    }

    #[test]
    fn test_nan_step_rejected() {
        let mut config = Config::default();
        config.simulation.step_meters = f64::NAN;
        assert_eq!(fields(&config), vec!["simulation.step_meters"]);
    }

    #[test]
    fn test_config_validation_error_display() {
        let mut config = Config::default();
        config.reporter.default_interval_ms = 0;
        let display = config.validate().unwrap_err().to_string();
        assert!(display.contains("Configuration validation failed"));
        assert!(display.contains("reporter.default_interval_ms: interval must be greater than 0"));
    }

    #[test]
    fn test_open_memory_store() {
        assert!(StoreConfig::default().open().is_ok());
    }

    #[test]
    fn test_open_firebase_store_rejects_bad_url() {
        let config = StoreConfig {
            backend: StoreBackend::Firebase,
            url: "localhost".to_string(),
            ..Default::default()
        };
        assert!(config.open().is_err());
    }

    #[test]
    fn test_open_shared_refuses_memory_store() {
        let err = StoreConfig::default().open_shared().err().unwrap();
        assert!(matches!(err, ConfigError::NotShared(StoreBackend::Memory)));
        assert!(err.to_string().contains("--store-url"));
    }

    #[test]
    fn test_open_shared_firebase_store() {
        let config = StoreConfig {
            backend: StoreBackend::Firebase,
            url: "https://demo-default-rtdb.firebaseio.com".to_string(),
            ..Default::default()
        };
        assert!(config.open_shared().is_ok());

        let config = StoreConfig {
            url: "localhost".to_string(),
            ..config
        };
        assert!(matches!(
            config.open_shared().err().unwrap(),
            ConfigError::Store(_)
        ));
    }
}

//! Bridge Configuration
//!
//! Read from a TOML file and `IBMS_`-prefixed environment variables, nested
//! keys separated by `__` (`IBMS_POLL__INTERVAL_SECS=30`). Every section has
//! defaults, so a minimal file only sets `poll.url` and `mapping.path`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::stack::{LocalDevice, Segmentation};
use crate::types::{MAX_INSTANCE, ObjectIdentifier, ObjectType};

pub const ENV_PREFIX: &str = "IBMS_";

/// Smallest APDU a BACnet device may accept
const MIN_APDU_LENGTH: u32 = 50;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read config: {0}")]
    Figment(#[from] Box<figment::Error>),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Figment(Box::new(err))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub poll: PollConfig,
    pub device: DeviceConfig,
    pub mapping: MappingConfig,
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    #[serde(alias = "get")]
    Get,
    #[serde(alias = "post")]
    Post,
    #[serde(alias = "put")]
    Put,
    #[serde(alias = "delete")]
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
}

/// Telemetry source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub url: String,
    pub method: HttpMethod,
    /// Query parameters; array values become repeated keys
    pub params: Map<String, Value>,
    pub headers: BTreeMap<String, String>,
    pub bearer_token: Option<String>,
    pub api_key: Option<String>,
    pub basic_auth: Option<BasicAuth>,
    /// JSON body for POST/PUT
    pub body: Option<Value>,
    pub timeout_secs: u64,
    pub interval_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: HttpMethod::Get,
            params: Map::new(),
            headers: BTreeMap::new(),
            bearer_token: None,
            api_key: None,
            basic_auth: None,
            body: None,
            timeout_secs: 30,
            interval_secs: 60,
        }
    }
}

impl PollConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Local device announcing the bridge objects
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub name: String,
    pub instance: u32,
    pub max_apdu_length: u32,
    pub segmentation: Segmentation,
    pub vendor_id: u16,
    pub address: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "ibms-bridge".to_string(),
            instance: 599,
            max_apdu_length: 1476,
            segmentation: Segmentation::SegmentedBoth,
            vendor_id: 999,
            address: "0.0.0.0:47808".to_string(),
        }
    }
}

impl DeviceConfig {
    pub fn to_local_device(&self) -> Result<LocalDevice, ConfigError> {
        let identifier =
            ObjectIdentifier::new(ObjectType::Device, self.instance).map_err(ConfigError::Invalid)?;
        Ok(LocalDevice {
            identifier,
            name: self.name.clone(),
            max_apdu_length: self.max_apdu_length,
            segmentation: self.segmentation,
            vendor_id: self.vendor_id,
            address: self.address.clone(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    pub path: PathBuf,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("mapping.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Distinct objects reconciled in parallel (1 = sequential)
    pub concurrency: usize,
    /// Announcements that may wait in the dispatch queue
    pub dispatch_queue: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            dispatch_queue: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub directory: PathBuf,
    pub file_name: String,
    /// EnvFilter directive; `RUST_LOG` takes precedence
    pub level: Option<String>,
    /// Rotated daily files kept, oldest deleted first
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("logs"),
            file_name: "app.log".to_string(),
            level: None,
            max_files: 7,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loading
// ─────────────────────────────────────────────────────────────────────────────

impl BridgeConfig {
    /// Providers in precedence order: defaults, file, environment
    pub fn figment(path: Option<&Path>) -> Figment {
        let figment = Figment::new();
        let figment = match path {
            Some(path) => figment.merge(Toml::file(path)),
            None => figment,
        };
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load and validate. A given path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
        }
        Self::from_figment(Self::figment(path))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        let url = self.poll.url.trim();
        if url.is_empty() {
            return invalid("poll.url is required".to_string());
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return invalid(format!("poll.url must be an http(s) URL, got '{}'", url));
        }
        if self.poll.interval_secs == 0 {
            return invalid("poll.interval_secs must be greater than 0".to_string());
        }
        if self.poll.timeout_secs == 0 {
            return invalid("poll.timeout_secs must be greater than 0".to_string());
        }
        if self.poll.body.is_some() && self.poll.method == HttpMethod::Get {
            return invalid("poll.body cannot be sent with GET".to_string());
        }
        if self.device.instance > MAX_INSTANCE {
            return invalid(format!(
                "device.instance {} exceeds {}",
                self.device.instance, MAX_INSTANCE
            ));
        }
        if self.device.max_apdu_length < MIN_APDU_LENGTH {
            return invalid(format!(
                "device.max_apdu_length must be at least {}",
                MIN_APDU_LENGTH
            ));
        }
        if self.device.name.trim().is_empty() {
            return invalid("device.name must not be empty".to_string());
        }
        if self.mapping.path.as_os_str().is_empty() {
            return invalid("mapping.path is required".to_string());
        }
        if self.sync.concurrency == 0 {
            return invalid("sync.concurrency must be greater than 0".to_string());
        }
        if self.sync.dispatch_queue == 0 {
            return invalid("sync.dispatch_queue must be greater than 0".to_string());
        }
        if self.logging.file_name.trim().is_empty() {
            return invalid("logging.file_name must not be empty".to_string());
        }
        if self.logging.max_files == 0 {
            return invalid("logging.max_files must be greater than 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::providers::Serialized;
    use serde_json::json;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    fn write_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_minimal_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[poll]
url = "https://api.open-meteo.com/v1/forecast"

[mapping]
path = "mapping.json"
"#,
        );

        let config = BridgeConfig::from_figment(Figment::new().merge(Toml::file(&path))).unwrap();
        assert_eq!(config.poll.method, HttpMethod::Get);
        assert_eq!(config.poll.interval(), Duration::from_secs(60));
        assert_eq!(config.poll.timeout(), Duration::from_secs(30));
        assert_eq!(config.device.max_apdu_length, 1476);
        assert_eq!(config.device.address, "0.0.0.0:47808");
        assert_eq!(config.sync.concurrency, 1);
        assert_eq!(config.sync.dispatch_queue, 256);
        assert_eq!(config.logging.file_name, "app.log");
        assert_eq!(config.logging.max_files, 7);
    }

    #[test]
    fn test_full_file() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[poll]
url = "https://api.open-meteo.com/v1/forecast"
method = "post"
interval_secs = 15
bearer_token = "secret"
body = { query = "current" }

[poll.params]
latitude = 52.52
longitude = 13.41
current = ["temperature_2m", "wind_speed_10m"]

[poll.headers]
Accept = "application/json"

[device]
name = "Weather Bridge"
instance = 1234
segmentation = "no-segmentation"
vendor_id = 15

[sync]
concurrency = 4
"#,
        );

        let config = BridgeConfig::from_figment(Figment::new().merge(Toml::file(&path))).unwrap();
        assert_eq!(config.poll.method, HttpMethod::Post);
        assert_eq!(config.poll.interval_secs, 15);
        assert_eq!(config.poll.bearer_token.as_deref(), Some("secret"));
        assert_eq!(config.poll.body, Some(json!({"query": "current"})));
        assert_eq!(
            config.poll.params.get("current"),
            Some(&json!(["temperature_2m", "wind_speed_10m"]))
        );
        assert_eq!(config.poll.headers.get("Accept").map(String::as_str), Some("application/json"));
        assert_eq!(config.device.segmentation, Segmentation::NoSegmentation);
        assert_eq!(config.sync.concurrency, 4);

        let device = config.device.to_local_device().unwrap();
        assert_eq!(device.identifier.to_string(), "device,1234");
        assert_eq!(device.name, "Weather Bridge");
    }

    #[test]
    fn test_overrides_take_precedence() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[poll]\nurl = \"http://localhost/data\"\ninterval_secs = 60\n");

        let figment = Figment::new()
            .merge(Toml::file(&path))
            .merge(Serialized::default("poll.interval_secs", 5));
        let config = BridgeConfig::from_figment(figment).unwrap();
        assert_eq!(config.poll.interval_secs, 5);
    }

    #[test]
    fn test_validation() {
        let mut config = BridgeConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.poll.url = "ftp://example.com".to_string();
        assert_err!(config.validate());

        config.poll.url = "http://example.com".to_string();
        assert_ok!(config.validate());

        config.poll.interval_secs = 0;
        assert_err!(config.validate());
        config.poll.interval_secs = 60;

        config.sync.concurrency = 0;
        assert_err!(config.validate());
        config.sync.concurrency = 1;

        config.device.instance = MAX_INSTANCE + 1;
        assert_err!(config.validate());
        config.device.instance = 1;

        config.logging.max_files = 0;
        assert_err!(config.validate());
        config.logging.max_files = 7;

        config.poll.body = Some(json!({}));
        assert_err!(config.validate());
        config.poll.method = HttpMethod::Put;
        assert_ok!(config.validate());
    }

    #[test]
    fn test_http_method_spellings() {
        for (raw, method) in [
            ("GET", HttpMethod::Get),
            ("post", HttpMethod::Post),
            ("PUT", HttpMethod::Put),
            ("delete", HttpMethod::Delete),
            ("DELETE", HttpMethod::Delete),
        ] {
            assert_eq!(serde_json::from_value::<HttpMethod>(json!(raw)).unwrap(), method);
        }
        assert!(serde_json::from_value::<HttpMethod>(json!("PATCH")).is_err());
    }

    #[test]
    fn test_unknown_segmentation_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "[poll]\nurl = \"http://localhost\"\n[device]\nsegmentation = \"sometimes\"\n",
        );
        assert!(matches!(
            BridgeConfig::from_figment(Figment::new().merge(Toml::file(&path))),
            Err(ConfigError::Figment(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            BridgeConfig::load(Some(&missing)),
            Err(ConfigError::NotFound(_))
        ));
    }
}

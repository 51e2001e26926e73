//! Configuration management for the hush CLI
//!
//! Configuration is stored in TOML format.
//!
//! # Configuration File Locations
//!
//! - Linux: `~/.config/hush/config.toml`
//! - macOS: `~/Library/Application Support/io.hush.hush/config.toml`
//! - Windows: `%APPDATA%\hush\hush\config\config.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use hush_core::descriptor::SignerMetadata;
use hush_core::SignerConfig;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot access config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("config file is not valid TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("cannot encode config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("bad config value: {0}")]
    ValidationError(String),
}

/// CLI configuration
///
/// # Example TOML
///
/// ```toml
/// [identity]
/// key_path = ""  # Empty = default location
///
/// [signer]
/// relays = ["wss://relay.hush.chat"]
/// handshake_timeout_seconds = 60
/// request_timeout_seconds = 30
/// name = "hush"
///
/// [storage]
/// db_path = ""  # Empty = default location
///
/// [cache]
/// resource_key_ttl_seconds = 86400
///
/// [output]
/// format = "table"
///
/// [logging]
/// level = "warn"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub signer: SignerSection,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Path to identity file (empty = default location)
    #[serde(default)]
    pub key_path: Option<PathBuf>,
}

/// Remote signer settings: relays, timeouts and the metadata shown to the
/// signer's user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerSection {
    #[serde(default = "default_relays")]
    pub relays: Vec<String>,

    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_seconds: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub image: Option<String>,
}

fn default_relays() -> Vec<String> {
    vec!["wss://relay.hush.chat".to_string()]
}

fn default_handshake_timeout() -> u64 {
    60
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for SignerSection {
    fn default() -> Self {
        Self {
            relays: default_relays(),
            handshake_timeout_seconds: default_handshake_timeout(),
            request_timeout_seconds: default_request_timeout(),
            name: Some("hush".to_string()),
            url: None,
            image: None,
        }
    }
}

impl SignerSection {
    /// Session configuration for `hush_core::RemoteSignerSession`.
    pub fn to_signer_config(&self) -> SignerConfig {
        SignerConfig::new(self.relays.clone())
            .with_metadata(SignerMetadata {
                name: self.name.clone(),
                url: self.url.clone(),
                image: self.image.clone(),
            })
            .with_handshake_timeout(Duration::from_secs(self.handshake_timeout_seconds))
            .with_request_timeout(Duration::from_secs(self.request_timeout_seconds))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the key database (empty = default location)
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Lifetime of unwrapped resource keys in memory
    #[serde(default = "default_resource_key_ttl")]
    pub resource_key_ttl_seconds: u64,
}

fn default_resource_key_ttl() -> u64 {
    24 * 60 * 60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            resource_key_ttl_seconds: default_resource_key_ttl(),
        }
    }
}

impl CacheConfig {
    pub fn resource_key_ttl(&self) -> Duration {
        Duration::from_secs(self.resource_key_ttl_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output format: "table", "json", "quiet"
    #[serde(default = "default_format")]
    pub format: String,

    #[serde(default)]
    pub verbose: bool,
}

fn default_format() -> String {
    "table".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            verbose: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("io", "hush", "hush")
}

impl Config {
    /// Read and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let parsed: Config = toml::from_str(&std::fs::read_to_string(path)?)?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// The platform config file if present, otherwise built-in defaults.
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path().filter(|p| p.exists()) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from custom path or default
    pub fn load_from(custom_path: Option<&Path>) -> Result<Self, ConfigError> {
        match custom_path {
            Some(path) => Self::load(path),
            None => Self::load_default(),
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Data directory for the identity file and key database
    pub fn data_dir() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
    }

    pub fn identity_path(&self) -> PathBuf {
        self.identity.key_path.clone().unwrap_or_else(|| {
            Self::data_dir()
                .map(|dir| dir.join("identity.json"))
                .unwrap_or_else(|| PathBuf::from("identity.json"))
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.storage.db_path.clone().unwrap_or_else(|| {
            Self::data_dir()
                .map(|dir| dir.join("keys.db"))
                .unwrap_or_else(|| PathBuf::from("keys.db"))
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let encoded = toml::to_string_pretty(self)?;
        path.parent().map(std::fs::create_dir_all).transpose()?;
        std::fs::write(path, encoded)?;
        Ok(())
    }

    /// Write the default configuration on first run. Returns whether a file
    /// was created.
    pub fn create_default_if_missing() -> Result<bool, ConfigError> {
        match Self::default_path().filter(|p| !p.exists()) {
            Some(path) => Self::default().save(&path).map(|()| true),
            None => Ok(false),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        one_of("output.format", &self.output.format, &["table", "json", "quiet"])?;
        one_of("logging.level", &self.logging.level, &["error", "warn", "info", "debug", "trace"])?;

        if self.signer.relays.is_empty() {
            return Err(invalid("signer.relays must list at least one relay"));
        }
        self.signer.relays.iter().try_for_each(|relay| validate_relay_url(relay))?;

        if self.signer.handshake_timeout_seconds == 0 || self.signer.request_timeout_seconds == 0 {
            return Err(invalid("signer timeouts must be greater than 0"));
        }
        if self.cache.resource_key_ttl_seconds == 0 {
            return Err(invalid("cache.resource_key_ttl_seconds must be greater than 0"));
        }
        Ok(())
    }

    pub fn sample_toml() -> &'static str {
        r#"# hush configuration

[identity]
# Path to identity file (empty = default location)
# key_path = ""

[signer]
# Relays used to reach a remote signer
relays = ["wss://relay.hush.chat"]
# Seconds to wait for the signer to accept a connection descriptor
handshake_timeout_seconds = 60
# Seconds to wait for each signer response
request_timeout_seconds = 30
# Shown by the signer when asking its user to approve
name = "hush"
# url = "https://hush.chat"
# image = "https://hush.chat/icon.png"

[storage]
# Path to the key database (empty = default location)
# db_path = ""

[cache]
# Lifetime of unwrapped channel keys in memory
resource_key_ttl_seconds = 86400

[output]
# Output format: "table", "json", "quiet"
format = "table"
verbose = false

[logging]
# Log level: "error", "warn", "info", "debug", "trace"
level = "warn"
"#
    }

    /// Apply CLI overrides; command-line arguments win over file values.
    pub fn with_overrides(mut self, overrides: &CliOverrides) -> Self {
        if let Some(ref format) = overrides.output_format {
            self.output.format = format.clone();
        }
        if let Some(verbose) = overrides.verbose {
            self.output.verbose = verbose;
        }
        if overrides.debug == Some(true) {
            self.logging.level = "debug".to_string();
        }
        if let Some(ref urls) = overrides.relay_urls {
            if !urls.is_empty() {
                self.signer.relays = urls.clone();
            }
        }
        if let Some(ref path) = overrides.identity_path {
            self.identity.key_path = Some(path.clone());
        }
        if let Some(ref path) = overrides.db_path {
            self.storage.db_path = Some(path.clone());
        }
        self
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}

fn one_of(field: &str, value: &str, allowed: &[&str]) -> Result<(), ConfigError> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(invalid(format!("{field} = {value:?}, expected one of {}", allowed.join(", "))))
    }
}

fn validate_relay_url(relay: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(relay).map_err(|e| invalid(format!("relay {relay:?}: {e}")))?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(invalid(format!("relay {relay:?}: scheme {other} is not ws:// or wss://"))),
    }
}

/// CLI flags that override config file values.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub output_format: Option<String>,
    pub verbose: Option<bool>,
    pub debug: Option<bool>,
    pub relay_urls: Option<Vec<String>>,
    pub identity_path: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
}

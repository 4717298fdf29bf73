//! Configuration types for the playback proxy

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{PlaybackError, Result};

/// Operating mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Forward all traffic and capture it into the loaded cassette
    Record,
    /// Answer all traffic from the loaded cassette
    Replay,
    /// Record when the cassette file is absent, replay when it exists
    #[default]
    Auto,
}

impl Mode {
    /// Lowercase name used on the wire
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Record => "record",
            Self::Replay => "replay",
            Self::Auto => "auto",
        }
    }
}

impl FromStr for Mode {
    type Err = PlaybackError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "record" => Ok(Self::Record),
            "replay" => Ok(Self::Replay),
            "auto" => Ok(Self::Auto),
            _ => Err(PlaybackError::InvalidMode(s.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address the proxy listens on
    #[serde(default = "default_address")]
    pub address: String,
    /// Base URL of the remote API that recorded traffic is forwarded to
    #[serde(default = "default_remote_url")]
    pub remote_url: String,
    /// Local application URL that webhooks are forwarded to
    #[serde(default = "default_webhook_url")]
    pub webhook_url: String,
    /// Mode in effect at startup
    #[serde(default)]
    pub mode: Mode,
    /// Root directory that cassette paths are resolved against
    #[serde(default = "default_cassette_dir")]
    pub cassette_dir: PathBuf,
    /// Cassette loaded at startup, relative to `cassette_dir`; `""` loads none
    #[serde(default = "default_cassette")]
    pub cassette: Option<String>,
    /// Timeouts and size limits
    #[serde(default)]
    pub limits: LimitsConfig,
}

fn default_address() -> String {
    "localhost:13111".to_string()
}

fn default_remote_url() -> String {
    "https://api.stripe.com".to_string()
}

fn default_webhook_url() -> String {
    "http://localhost:13112".to_string()
}

fn default_cassette_dir() -> PathBuf {
    PathBuf::from(".")
}

#[allow(clippy::unnecessary_wraps)]
fn default_cassette() -> Option<String> {
    Some("default_cassette.yaml".to_string())
}

/// Timeouts and size limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Timeout for every forwarded request, in seconds
    pub forward_timeout_secs: u64,
    /// How long replay waits for a client response to drain before firing its webhooks
    pub webhook_flush_timeout_secs: u64,
    /// Maximum accepted request body in bytes
    pub max_body_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            forward_timeout_secs: 10,
            webhook_flush_timeout_secs: 10,
            max_body_size: 16 * 1024 * 1024, // 16 MB
        }
    }
}

impl LimitsConfig {
    /// Forwarding timeout as a `Duration`
    #[must_use]
    pub fn forward_timeout(&self) -> Duration {
        Duration::from_secs(self.forward_timeout_secs)
    }

    /// Webhook flush timeout as a `Duration`
    #[must_use]
    pub fn webhook_flush_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_flush_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: default_address(),
            remote_url: default_remote_url(),
            webhook_url: default_webhook_url(),
            mode: Mode::default(),
            cassette_dir: default_cassette_dir(),
            cassette: default_cassette(),
            limits: LimitsConfig::default(),
        }
    }
}

impl Config {
    /// Build a configuration with defaults and no initial cassette
    #[must_use]
    pub fn new(
        remote_url: impl Into<String>,
        webhook_url: impl Into<String>,
        cassette_dir: impl Into<PathBuf>,
        mode: Mode,
    ) -> Self {
        Self {
            address: default_address(),
            remote_url: remote_url.into(),
            webhook_url: webhook_url.into(),
            mode,
            cassette_dir: cassette_dir.into(),
            cassette: None,
            limits: LimitsConfig::default(),
        }
    }

    /// Cassette to load at startup, if any
    #[must_use]
    pub fn initial_cassette(&self) -> Option<&str> {
        self.cassette.as_deref().filter(|name| !name.trim().is_empty())
    }

    /// Load `path` when given, otherwise fall back to the defaults
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, parsed or validated
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Load configuration from TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PlaybackError::ConfigError(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| PlaybackError::ConfigError(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<()> {
        for (name, url) in [("remote_url", &self.remote_url), ("webhook_url", &self.webhook_url)] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(PlaybackError::ConfigError(format!(
                    "{name} must be an http:// or https:// URL, got \"{url}\""
                )));
            }
        }

        if self.address.is_empty() {
            return Err(PlaybackError::ConfigError(
                "address cannot be empty".to_string(),
            ));
        }

        if self.limits.forward_timeout_secs == 0 {
            return Err(PlaybackError::ConfigError(
                "limits.forward_timeout_secs must be > 0".to_string(),
            ));
        }

        if self.limits.max_body_size == 0 {
            return Err(PlaybackError::ConfigError(
                "limits.max_body_size must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

//! Configuration for Chaski

use crate::types::{parse_params, ByteSize};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Port assumed by clients and used for peer relay unless configured otherwise
pub const DEFAULT_PORT: u16 = 4567;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Static peer table: domain -> `host[:port]`
    #[serde(default)]
    pub peers: HashMap<String, String>,

    /// Ordered plugin chain
    #[serde(default)]
    pub plugins: Vec<PluginSpec>,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Name under which this server owns mail (`local@identity`)
    #[serde(default = "default_identity")]
    pub identity: String,

    /// Bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Listening port, also the port assumed for peers
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum size of one request document
    #[serde(default = "default_max_message_size")]
    pub max_message_size: ByteSize,

    /// Maximum concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Deadline for receiving the whole request, in seconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Validate requests against the built-in protocol schema
    #[serde(default)]
    pub validate_schema: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            identity: default_identity(),
            bind_address: default_bind_address(),
            port: default_port(),
            max_message_size: default_max_message_size(),
            max_connections: default_max_connections(),
            read_timeout_secs: default_read_timeout(),
            validate_schema: false,
        }
    }
}

fn default_identity() -> String {
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_max_message_size() -> ByteSize {
    ByteSize(10 * 1024 * 1024) // 10 MB
}

fn default_max_connections() -> usize {
    100
}

fn default_read_timeout() -> u64 {
    300
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

/// Predicate deciding whether a plugin takes part in a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRule {
    /// Every request
    Any,
    /// At least one node matches the path
    Exists(String),
    /// No node matches the path
    Absent(String),
}

/// Scalar plugin parameter as written in TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Text(s) => write!(f, "{}", s),
            ParamValue::Integer(n) => write!(f, "{}", n),
            ParamValue::Float(n) => write!(f, "{}", n),
            ParamValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// One entry of the plugin chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginSpec {
    /// Registry name of the plugin ("auth", "store", ...)
    pub kind: String,

    /// Plugin parameters
    #[serde(default)]
    pub params: HashMap<String, ParamValue>,

    /// Legacy `key=value, key=value` parameter string, merged into `params`
    #[serde(default)]
    pub parameters: Option<String>,

    /// Override of the plugin's default match predicate
    #[serde(default, rename = "match")]
    pub match_rule: Option<MatchRule>,
}

impl PluginSpec {
    /// Create a spec with no parameters
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            params: HashMap::new(),
            parameters: None,
            match_rule: None,
        }
    }

    /// Add a parameter
    pub fn with_param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.params
            .insert(key.to_string(), ParamValue::Text(value.into()));
        self
    }

    /// Override the match predicate
    pub fn with_match(mut self, rule: MatchRule) -> Self {
        self.match_rule = Some(rule);
        self
    }

    /// Flattened string parameters; the table wins over the legacy string
    pub fn resolved_params(&self) -> HashMap<String, String> {
        let mut params = self
            .parameters
            .as_deref()
            .map(parse_params)
            .unwrap_or_default();

        for (key, value) in &self.params {
            params.insert(key.clone(), value.to_string());
        }

        params
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default locations
    pub fn load() -> crate::Result<Self> {
        let paths = [
            PathBuf::from("./chaski.toml"),
            PathBuf::from("/etc/chaski/chaski.toml"),
        ];

        for path in paths {
            if path.exists() {
                tracing::debug!(path = %path.display(), "Loading configuration");
                return Self::from_file(&path);
            }
        }

        Err(crate::Error::Config(
            "No configuration file found".to_string(),
        ))
    }

    /// Check values serde cannot check on its own
    pub fn validate(&self) -> crate::Result<()> {
        if self.server.identity.trim().is_empty() {
            return Err(crate::Error::Config("server.identity is empty".to_string()));
        }
        if self.server.max_message_size.as_u64() == 0 {
            return Err(crate::Error::Config(
                "server.max_message_size must be positive".to_string(),
            ));
        }
        if self.server.max_connections == 0 {
            return Err(crate::Error::Config(
                "server.max_connections must be positive".to_string(),
            ));
        }
        if let Some(spec) = self.plugins.iter().find(|p| p.kind.trim().is_empty()) {
            return Err(crate::Error::Config(format!(
                "Plugin entry without kind: {:?}",
                spec
            )));
        }
        Ok(())
    }
}

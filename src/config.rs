//! Configuration module for kvsync
//!
//! Loads the run configuration from a TOML file, with sensible defaults for
//! all optional values. Command-line flags are layered on top by the binary.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, SyncError};

/// Default number of keys requested per scan page (SCAN COUNT hint)
pub const DEFAULT_PAGE_SIZE: usize = 10_000;

/// Default pipeline batch bound
pub const DEFAULT_BATCH_THRESHOLD: usize = 1000;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Store keys are read from
    pub source: EndpointConfig,

    /// Store keys are written to
    pub destination: EndpointConfig,

    /// Engine tuning
    pub sync: SyncConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        Self::parse_str(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn parse_str(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| SyncError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate the configuration. `copy` additionally requires a destination.
    pub fn validate(&self, copy: bool) -> Result<()> {
        if self.source.hosts.is_empty() {
            return Err(SyncError::Config(
                "Please specify a source using --source-hosts=127.0.0.1:6379".to_string(),
            ));
        }
        self.source.validate("source")?;

        if copy {
            if self.destination.hosts.is_empty() {
                return Err(SyncError::Config(
                    "Please specify a destination using --destination-hosts=127.0.0.1:6379"
                        .to_string(),
                ));
            }
            self.destination.validate("destination")?;
        }

        self.sync.validate()
    }

    /// Apply a `section.key=value` override.
    pub fn apply_override(&mut self, key: &str, value: &str) -> Result<()> {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
            value
                .parse()
                .map_err(|_| SyncError::Config(format!("Invalid value for {}: {}", key, value)))
        }

        match key {
            "sync.page_size" => self.sync.page_size = parse(key, value)?,
            "sync.batch_threshold" => self.sync.batch_threshold = parse(key, value)?,
            "sync.max_concurrent_shards" => self.sync.max_concurrent_shards = parse(key, value)?,
            "sync.failure_list_limit" => self.sync.failure_list_limit = parse(key, value)?,
            "sync.key_filter" => self.sync.key_filter = value.to_string(),
            "sync.key_file" => self.sync.key_file = Some(PathBuf::from(value)),
            "sync.write_mode" => {
                self.sync.write_mode = match value {
                    "batched" | "pipeline" => WriteMode::Batched,
                    "direct" => WriteMode::Direct,
                    _ => {
                        return Err(SyncError::Config(format!(
                            "Invalid write mode: {} (expected batched or direct)",
                            value
                        )))
                    }
                }
            }
            "source.mode" => self.source.mode = value.parse()?,
            "destination.mode" => self.destination.mode = value.parse()?,
            "source.connect_timeout_ms" => self.source.connect_timeout_ms = parse(key, value)?,
            "destination.connect_timeout_ms" => {
                self.destination.connect_timeout_ms = parse(key, value)?
            }
            "logging.level" => self.logging.level = value.to_string(),
            _ => return Err(SyncError::Config(format!("Unknown config key: {}", key))),
        }
        Ok(())
    }
}

/// How a host list is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TopologyMode {
    /// One host is a single node, several hosts are cluster seeds
    #[default]
    Auto,
    /// Always a single node (only the first host is used)
    Single,
    /// Always a cluster, even with one seed host
    Cluster,
}

impl std::str::FromStr for TopologyMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(Self::Auto),
            "single" => Ok(Self::Single),
            "cluster" => Ok(Self::Cluster),
            _ => Err(SyncError::Config(format!(
                "Invalid topology mode: {} (expected auto, single or cluster)",
                s
            ))),
        }
    }
}

/// One side of the migration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// `host:port` endpoints
    pub hosts: Vec<String>,

    /// Single node or cluster
    pub mode: TopologyMode,

    /// TCP connect timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            mode: TopologyMode::Auto,
            connect_timeout_ms: 5000,
        }
    }
}

impl EndpointConfig {
    /// Connect timeout as a `Duration`
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// `true` when the host list describes a cluster
    pub fn is_cluster(&self) -> bool {
        match self.mode {
            TopologyMode::Auto => self.hosts.len() > 1,
            TopologyMode::Single => false,
            TopologyMode::Cluster => true,
        }
    }

    fn validate(&self, side: &str) -> Result<()> {
        if self.connect_timeout_ms == 0 {
            return Err(SyncError::Config(format!(
                "{}.connect_timeout_ms cannot be 0",
                side
            )));
        }
        if self.hosts.iter().any(|h| h.trim().is_empty()) {
            return Err(SyncError::Config(format!("{} host list has an empty entry", side)));
        }
        Ok(())
    }
}

/// Destination write strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Writes accumulate into a bounded per-shard pipeline batch
    #[default]
    Batched,
    /// One acknowledged write per key
    Direct,
}

/// Engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// SCAN COUNT hint per page
    pub page_size: usize,

    /// Pipeline batch bound; a batch is flushed when it reaches this size
    pub batch_threshold: usize,

    /// Batched or direct writes
    pub write_mode: WriteMode,

    /// Upper bound on shard scan loops running at once
    pub max_concurrent_shards: usize,

    /// Glob filter applied to both scans; `*` means every key
    pub key_filter: String,

    /// Line-delimited key list; replaces scanning the source
    pub key_file: Option<PathBuf>,

    /// How many failed key names the run report keeps
    pub failure_list_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            batch_threshold: DEFAULT_BATCH_THRESHOLD,
            write_mode: WriteMode::Batched,
            max_concurrent_shards: 16,
            key_filter: "*".to_string(),
            key_file: None,
            failure_list_limit: 1000,
        }
    }
}

impl SyncConfig {
    /// Validate engine tuning
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(SyncError::Config("page_size cannot be 0".to_string()));
        }
        if self.batch_threshold == 0 {
            return Err(SyncError::Config("batch_threshold cannot be 0".to_string()));
        }
        if self.max_concurrent_shards == 0 {
            return Err(SyncError::Config(
                "max_concurrent_shards cannot be 0".to_string(),
            ));
        }
        if self.key_file.is_some() && self.match_pattern().is_some() {
            return Err(SyncError::Config(
                "Can not use key_filter together with key_file".to_string(),
            ));
        }
        Ok(())
    }

    /// The MATCH pattern to send, or `None` when every key is wanted.
    pub fn match_pattern(&self) -> Option<&str> {
        match self.key_filter.as_str() {
            "" | "*" => None,
            pattern => Some(pattern),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (pretty, json)
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format
    #[default]
    Pretty,

    /// JSON format
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.sync.page_size, 10_000);
        assert_eq!(config.sync.batch_threshold, 1000);
        assert_eq!(config.sync.write_mode, WriteMode::Batched);
        assert_eq!(config.sync.match_pattern(), None);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_full_file() {
        let config = Config::parse_str(
            r#"
[source]
hosts = ["10.0.0.1:6379"]

[destination]
hosts = ["10.0.1.1:7000", "10.0.1.2:7000"]
connect_timeout_ms = 250

[sync]
page_size = 500
write_mode = "direct"
key_filter = "user:*"

[logging]
format = "json"
"#,
        )
        .unwrap();

        assert!(!config.source.is_cluster());
        assert!(config.destination.is_cluster());
        assert_eq!(config.destination.connect_timeout(), Duration::from_millis(250));
        assert_eq!(config.sync.page_size, 500);
        assert_eq!(config.sync.batch_threshold, DEFAULT_BATCH_THRESHOLD);
        assert_eq!(config.sync.write_mode, WriteMode::Direct);
        assert_eq!(config.sync.match_pattern(), Some("user:*"));
        assert_eq!(config.logging.format, LogFormat::Json);
        config.validate(true).unwrap();
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[source]\nhosts = [\"127.0.0.1:6379\"]\nmode = \"cluster\"").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert!(config.source.is_cluster());
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = Config::from_file(Path::new("/nonexistent/kvsync.toml")).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_validate_requires_hosts() {
        let mut config = Config::default();
        assert!(config.validate(false).is_err());

        config.source.hosts = vec!["127.0.0.1:6379".into()];
        config.validate(false).unwrap();
        assert!(config.validate(true).is_err());
    }

    #[test]
    fn test_key_file_excludes_filter() {
        let mut sync = SyncConfig {
            key_file: Some(PathBuf::from("keys.txt")),
            ..Default::default()
        };
        sync.validate().unwrap();

        sync.key_filter = "session:*".into();
        assert!(sync.validate().is_err());
    }

    #[test]
    fn test_zero_tuning_rejected() {
        for key in ["sync.page_size", "sync.batch_threshold", "sync.max_concurrent_shards"] {
            let mut config = Config::default();
            config.apply_override(key, "0").unwrap();
            assert!(config.sync.validate().is_err(), "{key} = 0 accepted");
        }
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        config.apply_override("sync.write_mode", "direct").unwrap();
        config.apply_override("sync.batch_threshold", "10").unwrap();
        assert_eq!(config.sync.write_mode, WriteMode::Direct);
        assert_eq!(config.sync.batch_threshold, 10);

        assert!(config.apply_override("sync.batch_threshold", "ten").is_err());
        assert!(config.apply_override("sync.write_mode", "eventually").is_err());
        assert!(config.apply_override("server.port", "1").is_err());
    }

    #[test]
    fn test_mode_overrides() {
        let mut config = Config::default();
        config.source.hosts = vec!["10.0.0.1:7000".into()];
        assert!(!config.source.is_cluster());

        config.apply_override("source.mode", "cluster").unwrap();
        config.apply_override("destination.mode", "single").unwrap();
        assert_eq!(config.source.mode, TopologyMode::Cluster);
        assert_eq!(config.destination.mode, TopologyMode::Single);
        assert!(config.source.is_cluster());

        assert!(config.apply_override("source.mode", "sharded").is_err());
        assert_eq!(config.source.mode, TopologyMode::Cluster);
    }
}

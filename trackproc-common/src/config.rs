//! Bootstrap configuration for trackproc
//!
//! Configuration sources, highest priority first:
//! 1. Command-line arguments (resolved by the binary)
//! 2. Process environment variables
//! 3. Secrets file (`key=value` lines)
//! 4. TOML config file
//! 5. Compiled defaults
//!
//! This module owns sources 2-5. Missing TOML files are not fatal: a warning is
//! logged and compiled defaults are used.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable naming an explicit TOML config file
pub const CONFIG_PATH_ENV: &str = "TRACKPROC_CONFIG";

/// Secrets file consulted when the TOML config does not name one
pub const DEFAULT_SECRETS_FILE: &str = "./secrets.config";

/// Bootstrap configuration loaded from TOML file
///
/// Every section is optional; omitted keys take their compiled defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TomlConfig {
    /// Path to the `key=value` secrets file
    #[serde(default)]
    pub secrets_file: Option<PathBuf>,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub transcode: TranscodeConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Object storage location and key layout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// Directory holding one sub-directory per bucket
    #[serde(default)]
    pub root: Option<PathBuf>,

    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Prefix under which uploads wait to be processed
    #[serde(default = "default_temp_prefix")]
    pub temp_prefix: String,

    /// Prefix under which processed tracks are published
    #[serde(default = "default_output_prefix")]
    pub output_prefix: String,
}

/// Job queue settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueConfig {
    #[serde(default = "default_queue_name")]
    pub name: String,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long a received message stays hidden before redelivery
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,

    /// Create the queue at startup if it does not exist yet
    #[serde(default = "default_true")]
    pub create_if_missing: bool,

    /// Deliveries before a message is dead-lettered (0 = unlimited)
    #[serde(default = "default_max_receive_count")]
    pub max_receive_count: u32,
}

/// Relational store settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// SQLite database file (defaults to `trackproc.db` in the data folder)
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// External transcoder settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscodeConfig {
    /// Transcoder executable
    #[serde(default = "default_program")]
    pub program: PathBuf,

    /// Output rate shared by both branches (Hz)
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Container format of the published track
    #[serde(default = "default_output_format")]
    pub output_format: String,
}

/// Job execution settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerConfig {
    /// Per-job deadline in seconds (0 disables the deadline)
    ///
    /// Must stay below `queue.visibility_timeout_secs`, or a running job
    /// could be redelivered to another worker.
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,

    /// Sub-window peak tracking: "signed" or "absolute"
    #[serde(default = "default_peak_mode")]
    pub peak_mode: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_bucket() -> String {
    "tracks".to_string()
}

fn default_temp_prefix() -> String {
    "tracks/temp".to_string()
}

fn default_output_prefix() -> String {
    "tracks".to_string()
}

fn default_queue_name() -> String {
    "track-processing".to_string()
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_visibility_timeout_secs() -> u64 {
    300
}

fn default_max_receive_count() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

fn default_program() -> PathBuf {
    PathBuf::from("sox")
}

fn default_sample_rate() -> u32 {
    44100
}

fn default_output_format() -> String {
    "mp3".to_string()
}

fn default_job_timeout_secs() -> u64 {
    240
}

fn default_peak_mode() -> String {
    "signed".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: None,
            bucket: default_bucket(),
            temp_prefix: default_temp_prefix(),
            output_prefix: default_output_prefix(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: default_queue_name(),
            poll_interval_ms: default_poll_interval_ms(),
            visibility_timeout_secs: default_visibility_timeout_secs(),
            create_if_missing: true,
            max_receive_count: default_max_receive_count(),
        }
    }
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            sample_rate: default_sample_rate(),
            output_format: default_output_format(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            job_timeout_secs: default_job_timeout_secs(),
            peak_mode: default_peak_mode(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Locate the TOML config file for this platform
///
/// Checks `~/.config/trackproc/trackproc.toml`, then
/// `/etc/trackproc/trackproc.toml` on Linux.
pub fn default_config_path() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("trackproc").join("trackproc.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/trackproc/trackproc.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// OS-dependent data folder used when no storage root or database path is configured
pub fn default_data_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("trackproc"))
        .unwrap_or_else(|| PathBuf::from("./trackproc_data"))
}

/// Load the TOML config
///
/// An explicit path must exist and parse. Without one, the platform default
/// is tried; if none is found the compiled defaults are returned.
pub fn load_toml_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Some(path) => path,
            None => {
                warn!("No TOML config file found, using compiled defaults");
                return Ok(TomlConfig::default());
            }
        },
    };

    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config = parse_toml_config(&content)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

    info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Parse TOML config text
pub fn parse_toml_config(content: &str) -> Result<TomlConfig> {
    toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
}

/// Values read from a `key=value` secrets file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Secrets {
    values: HashMap<String, String>,
}

impl Secrets {
    /// Parse secrets file content
    ///
    /// One `key=value` pair per line. Blank lines and `#` comments are skipped;
    /// the value is everything after the first `=`.
    pub fn parse(content: &str) -> Self {
        let mut values = HashMap::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => {
                    values.insert(key.trim().to_string(), value.trim().to_string());
                }
                _ => warn!("Ignoring malformed secrets line without key=value"),
            }
        }

        Self { values }
    }

    /// Load a secrets file
    ///
    /// A missing file yields empty secrets when `required` is false.
    pub fn load(path: &Path, required: bool) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let secrets = Self::parse(&content);
                info!(
                    "Loaded {} secrets from {}",
                    secrets.values.len(),
                    path.display()
                );
                Ok(secrets)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                debug!("No secrets file at {}", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(Error::Config(format!(
                "Read secrets file {} failed: {}",
                path.display(),
                e
            ))),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Process environment layered over the secrets file
#[derive(Debug, Clone, Default)]
pub struct EnvOverlay {
    secrets: Secrets,
}

impl EnvOverlay {
    pub fn new(secrets: Secrets) -> Self {
        Self { secrets }
    }

    /// Look up a setting: process environment first, then secrets
    pub fn get(&self, key: &str) -> Option<String> {
        match std::env::var(key) {
            Ok(value) if !value.trim().is_empty() => Some(value),
            _ => self.secrets.get(key).map(str::to_string),
        }
    }
}

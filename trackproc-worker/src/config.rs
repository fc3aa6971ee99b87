//! Worker settings resolution
//!
//! Each setting is taken from the first source that has it:
//! 1. Command-line argument
//! 2. Process environment
//! 3. Secrets file
//! 4. TOML config file
//! 5. Compiled default
//!
//! Sources 2 and 3 are both read through [`EnvOverlay`].

use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;
use trackproc_common::config::{default_data_folder, EnvOverlay, TomlConfig};
use trackproc_common::{Error, Result};

use crate::pipeline::PipelineSettings;
use crate::storage::KeyLayout;
use crate::waveform::{PeakMode, PreviewConfig};

pub const ENV_STORAGE_ROOT: &str = "TRACKPROC_STORAGE_ROOT";
pub const ENV_BUCKET: &str = "TRACKPROC_BUCKET";
pub const ENV_QUEUE_NAME: &str = "TRACKPROC_QUEUE_NAME";
pub const ENV_DATABASE: &str = "TRACKPROC_DATABASE";
pub const ENV_SOX: &str = "TRACKPROC_SOX";

/// Settings given on the command line
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub storage_root: Option<PathBuf>,
    pub bucket: Option<String>,
    pub queue_name: Option<String>,
    pub database: Option<PathBuf>,
    pub sox: Option<PathBuf>,
}

/// Fully resolved worker settings
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    pub storage_root: PathBuf,
    pub bucket: String,
    pub queue_name: String,
    pub database_path: PathBuf,
    pub sox_program: PathBuf,
    pub poll_interval: Duration,
    pub visibility_timeout: Duration,
    /// Deliveries before a message is dead-lettered; `None` is unlimited
    pub max_receive_count: Option<u32>,
    pub create_queue: bool,
    pub pipeline: PipelineSettings,
    pub log_level: String,
}

impl WorkerSettings {
    pub fn resolve(cli: &CliOverrides, env: &EnvOverlay, toml: &TomlConfig) -> Result<Self> {
        let data_folder = default_data_folder();

        let storage_root = cli
            .storage_root
            .clone()
            .or_else(|| env.get(ENV_STORAGE_ROOT).map(PathBuf::from))
            .or_else(|| toml.storage.root.clone())
            .unwrap_or_else(|| data_folder.join("storage"));

        let bucket = cli
            .bucket
            .clone()
            .or_else(|| env.get(ENV_BUCKET))
            .unwrap_or_else(|| toml.storage.bucket.clone());

        let queue_name = cli
            .queue_name
            .clone()
            .or_else(|| env.get(ENV_QUEUE_NAME))
            .unwrap_or_else(|| toml.queue.name.clone());

        let database_path = cli
            .database
            .clone()
            .or_else(|| env.get(ENV_DATABASE).map(PathBuf::from))
            .or_else(|| toml.database.path.clone())
            .unwrap_or_else(|| data_folder.join("trackproc.db"));

        let sox_program = cli
            .sox
            .clone()
            .or_else(|| env.get(ENV_SOX).map(PathBuf::from))
            .unwrap_or_else(|| toml.transcode.program.clone());

        if toml.queue.poll_interval_ms == 0 {
            return Err(Error::Config("queue.poll_interval_ms must be positive".to_string()));
        }
        if toml.transcode.sample_rate == 0 {
            return Err(Error::Config("transcode.sample_rate must be positive".to_string()));
        }
        if toml.transcode.output_format.trim().is_empty() {
            return Err(Error::Config("transcode.output_format is empty".to_string()));
        }

        let peak_mode: PeakMode = toml
            .worker
            .peak_mode
            .parse()
            .map_err(|e| Error::Config(format!("worker.peak_mode: {}", e)))?;

        let job_timeout = match toml.worker.job_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let visibility_timeout = Duration::from_secs(toml.queue.visibility_timeout_secs);
        if let Some(limit) = job_timeout {
            if limit >= visibility_timeout {
                return Err(Error::Config(format!(
                    "worker.job_timeout_secs ({}) must be below queue.visibility_timeout_secs ({})",
                    limit.as_secs(),
                    visibility_timeout.as_secs()
                )));
            }
        }

        let settings = Self {
            storage_root,
            bucket,
            queue_name,
            database_path,
            sox_program,
            poll_interval: Duration::from_millis(toml.queue.poll_interval_ms),
            visibility_timeout,
            max_receive_count: match toml.queue.max_receive_count {
                0 => None,
                max => Some(max),
            },
            create_queue: toml.queue.create_if_missing,
            pipeline: PipelineSettings {
                layout: KeyLayout {
                    temp_prefix: toml.storage.temp_prefix.clone(),
                    output_prefix: toml.storage.output_prefix.clone(),
                    output_format: toml.transcode.output_format.trim().to_ascii_lowercase(),
                },
                sample_rate: toml.transcode.sample_rate,
                preview: PreviewConfig::with_peak_mode(peak_mode),
                job_timeout,
            },
            log_level: toml.logging.level.clone(),
        };

        debug!(?settings, "Resolved worker settings");
        Ok(settings)
    }
}

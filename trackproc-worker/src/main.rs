//! trackproc-worker - entry point
//!
//! Subcommands:
//! - `run` (default): consume the job queue until Ctrl+C / SIGTERM
//! - `enqueue`: put one job on the queue
//! - `preview`: print the waveform preview of a local canonical WAV file

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use trackproc_common::config::{
    load_toml_config, EnvOverlay, Secrets, TomlConfig, CONFIG_PATH_ENV, DEFAULT_SECRETS_FILE,
};
use trackproc_common::db::init_database;
use trackproc_worker::config::{CliOverrides, WorkerSettings};
use trackproc_worker::db::SqliteTrackStore;
use trackproc_worker::job::job_attributes;
use trackproc_worker::queue::SqliteJobQueue;
use trackproc_worker::storage::LocalObjectStore;
use trackproc_worker::transcode::SoxTranscoder;
use trackproc_worker::waveform::{decode_reader, PeakMode, PreviewConfig};
use trackproc_worker::{JobConsumer, PipelineCoordinator};

/// Command-line arguments for trackproc-worker
#[derive(Parser, Debug)]
#[command(name = "trackproc-worker")]
#[command(about = "Track processing worker: transcode uploads and build waveform previews")]
#[command(version)]
struct Args {
    /// TOML config file
    #[arg(short, long, global = true, env = CONFIG_PATH_ENV)]
    config: Option<PathBuf>,

    /// Object storage root directory
    #[arg(long, global = true)]
    storage_root: Option<PathBuf>,

    /// Bucket under the storage root
    #[arg(long, global = true)]
    bucket: Option<String>,

    /// Job queue name
    #[arg(long, global = true)]
    queue_name: Option<String>,

    /// SQLite database file
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Transcoder executable
    #[arg(long, global = true)]
    sox: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Consume the job queue (default)
    Run,

    /// Enqueue one processing job
    Enqueue {
        /// Uploaded object key, relative to the temporary prefix
        #[arg(long)]
        temporary_object_key: String,

        /// Track to mark processed
        #[arg(long)]
        track_id: String,

        /// Register the track with this title if it does not exist yet
        #[arg(long)]
        title: Option<String>,
    },

    /// Print the waveform preview of a canonical WAV file as JSON
    Preview {
        file: PathBuf,

        /// signed or absolute
        #[arg(long)]
        peak_mode: Option<PeakMode>,
    },
}

impl Args {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            storage_root: self.storage_root.clone(),
            bucket: self.bucket.clone(),
            queue_name: self.queue_name.clone(),
            database: self.database.clone(),
            sox: self.sox.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml = load_toml_config(args.config.as_deref()).context("Failed to load config")?;
    init_tracing(&toml.logging.level);

    let secrets = load_secrets(&toml)?;
    let settings = WorkerSettings::resolve(&args.overrides(), &EnvOverlay::new(secrets), &toml)
        .context("Invalid configuration")?;

    match args.command {
        None | Some(Command::Run) => run(settings).await,
        Some(Command::Enqueue {
            temporary_object_key,
            track_id,
            title,
        }) => enqueue(settings, &temporary_object_key, &track_id, title.as_deref()).await,
        Some(Command::Preview { file, peak_mode }) => {
            let peak_mode = peak_mode.unwrap_or(settings.pipeline.preview.peak_mode);
            preview(&file, PreviewConfig::with_peak_mode(peak_mode)).await
        }
    }
}

/// RUST_LOG wins; otherwise the configured level applies to the trackproc crates
fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!("trackproc_worker={level},trackproc_common={level}").into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_secrets(toml: &TomlConfig) -> Result<Secrets> {
    let (path, required) = match &toml.secrets_file {
        Some(path) => (path.clone(), true),
        None => (PathBuf::from(DEFAULT_SECRETS_FILE), false),
    };
    Secrets::load(&path, required).context("Failed to load secrets")
}

async fn run(settings: WorkerSettings) -> Result<()> {
    info!("Starting trackproc-worker v{}", env!("CARGO_PKG_VERSION"));
    info!("Database: {}", settings.database_path.display());
    info!(
        "Storage: {} (bucket {})",
        settings.storage_root.display(),
        settings.bucket
    );

    let pool = init_database(&settings.database_path)
        .await
        .context("Failed to open database")?;

    let store = LocalObjectStore::open(&settings.storage_root, &settings.bucket)
        .await
        .context("Failed to open object store")?;

    // Resolved once; an unknown queue stops startup
    let queue = SqliteJobQueue::resolve(
        pool.clone(),
        &settings.queue_name,
        settings.visibility_timeout,
        settings.create_queue,
    )
    .await
    .context("Failed to resolve job queue")?
    .with_max_receive_count(settings.max_receive_count);
    info!("Queue: {}", queue.name());

    let coordinator = PipelineCoordinator::new(
        Arc::new(store),
        Arc::new(SoxTranscoder::new(&settings.sox_program)),
        Arc::new(SqliteTrackStore::new(pool.clone())),
        settings.pipeline.clone(),
    );
    let consumer = JobConsumer::new(Arc::new(queue), Arc::new(coordinator), settings.poll_interval);

    let shutdown = CancellationToken::new();
    let consumer_task = tokio::spawn(consumer.run(shutdown.clone()));

    shutdown_signal().await;
    shutdown.cancel();

    let stats = consumer_task.await.context("Consumer task failed")?;
    pool.close().await;

    info!(
        "Shutdown complete ({} polls, {} completed, {} failed)",
        stats.polls, stats.completed, stats.failed
    );
    Ok(())
}

async fn enqueue(
    settings: WorkerSettings,
    temporary_object_key: &str,
    track_id: &str,
    title: Option<&str>,
) -> Result<()> {
    let pool = init_database(&settings.database_path)
        .await
        .context("Failed to open database")?;

    if let Some(title) = title {
        let created = SqliteTrackStore::new(pool.clone())
            .insert_track(track_id, Some(title))
            .await
            .context("Failed to register track")?;
        if created {
            info!("Registered track {}", track_id);
        }
    }

    let queue = SqliteJobQueue::resolve(
        pool.clone(),
        &settings.queue_name,
        settings.visibility_timeout,
        settings.create_queue,
    )
    .await
    .context("Failed to resolve job queue")?;

    let message_id = queue
        .send(&job_attributes(temporary_object_key, track_id))
        .await
        .context("Failed to enqueue job")?;
    info!(
        "Enqueued job {} on {} ({} pending)",
        message_id,
        queue.name(),
        queue.pending_count().await?
    );
    println!("{}", message_id);

    pool.close().await;
    Ok(())
}

async fn preview(file: &std::path::Path, config: PreviewConfig) -> Result<()> {
    let mut reader = tokio::fs::File::open(file)
        .await
        .with_context(|| format!("Failed to open {}", file.display()))?;
    let preview = decode_reader(&mut reader, config)
        .await
        .with_context(|| format!("Failed to decode {}", file.display()))?;

    println!("{}", serde_json::to_string(&preview)?);
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, finishing current job");
        },
        _ = terminate => {
            info!("Received terminate signal, finishing current job");
        },
    }
}

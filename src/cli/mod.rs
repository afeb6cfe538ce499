//! Command-line interface for pathways.
//!
//! Provides commands for serving the HTTP API, running a queue worker,
//! processing a single recording, and checking submission status.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::{self, DispatchMode, ResolvedConfig};
use crate::core::{JobStatus, StatusReader, TempScratch, Worker};
use crate::domain::{AudioFormat, AudioPayload, Submission, SubmissionId};
use crate::ingest::{QueueConsumer, SubmissionIngress};
use crate::server::{self, AppState};
use crate::store::MemoryStore;

/// pathways - voice submissions to consultation responses and MP letters
#[derive(Parser, Debug)]
#[command(name = "pathways")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP API
    Serve {
        /// Address to bind to (overrides server.bind)
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },

    /// Consume the submission queue
    Worker {
        /// Drain pending submissions and exit
        #[arg(long)]
        once: bool,
    },

    /// Run one recording through the pipeline and print the result
    Process {
        /// Audio file
        file: PathBuf,

        /// Content type (guessed from the file extension if not given)
        #[arg(short, long)]
        content_type: Option<String>,

        /// Submission id (generated if not given)
        #[arg(long)]
        id: Option<String>,

        /// Keep artifacts in memory instead of the configured store
        #[arg(long)]
        dry_run: bool,
    },

    /// Check the status of a submission
    Status {
        /// Submission id
        submission_id: String,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let cfg = config::config()?;

        match self.command {
            Commands::Serve { bind } => serve(cfg, bind).await,
            Commands::Worker { once } => run_worker(cfg, once).await,
            Commands::Process {
                file,
                content_type,
                id,
                dry_run,
            } => process_file(cfg, &file, content_type.as_deref(), id.as_deref(), dry_run).await,
            Commands::Status { submission_id } => show_status(cfg, &submission_id).await,
            Commands::Config => show_config(cfg),
        }
    }
}

async fn serve(cfg: &ResolvedConfig, bind: Option<SocketAddr>) -> Result<()> {
    let state = AppState {
        ingress: SubmissionIngress::new(cfg.dispatcher().await?),
        status: cfg.status_reader().await?,
    };

    let app = server::router(state, cfg.server.max_upload_bytes);
    server::bind_and_serve(bind.unwrap_or(cfg.server.bind), app).await
}

async fn run_worker(cfg: &ResolvedConfig, once: bool) -> Result<()> {
    if cfg.dispatch.mode != DispatchMode::Queue {
        tracing::warn!("dispatch.mode is in-process; the server will not enqueue work for this worker");
    }

    let consumer = QueueConsumer::new(cfg.queue().await?, cfg.worker().await?)
        .with_poll_interval(cfg.dispatch.poll_interval);

    if once {
        let summary = consumer.drain().await?;
        eprintln!(
            "Drained queue: {} completed, {} skipped, {} failed",
            summary.completed, summary.skipped, summary.failed
        );
        return Ok(());
    }

    consumer.run().await?;
    Ok(())
}

/// Guess a format from a file extension
fn format_for_path(path: &Path) -> AudioFormat {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "m4a" | "mp4" => AudioFormat::Mp4,
        "mp3" => AudioFormat::Mpeg,
        "wav" => AudioFormat::Wav,
        "ogg" | "oga" | "opus" => AudioFormat::Ogg,
        "webm" => AudioFormat::Webm,
        "aac" => AudioFormat::Aac,
        "flac" => AudioFormat::Flac,
        _ => AudioFormat::OctetStream,
    }
}

async fn process_file(
    cfg: &ResolvedConfig,
    file: &Path,
    content_type: Option<&str>,
    id: Option<&str>,
    dry_run: bool,
) -> Result<()> {
    let format = match content_type {
        Some(ct) => AudioFormat::from_content_type(ct)?,
        None => format_for_path(file),
    };
    let id = match id {
        Some(raw) => SubmissionId::parse(raw)?,
        None => SubmissionId::generate(),
    };

    let audio = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let worker = if dry_run {
        Worker::new(
            Arc::new(MemoryStore::new()),
            cfg.transcriber()?,
            cfg.generator()?,
            Arc::new(TempScratch::new()?),
        )
        .with_prompts(cfg.prompts()?)
        .with_retry(cfg.generation.retry.clone())
    } else {
        cfg.worker().await?
    };

    eprintln!("Processing {} as {} ({})", file.display(), id, format);

    let result = worker
        .process(Submission::new(id.clone(), format, AudioPayload::Raw(audio)))
        .await
        .with_context(|| format!("Submission {} failed", id))?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn show_status(cfg: &ResolvedConfig, submission_id: &str) -> Result<()> {
    let id = SubmissionId::parse(submission_id)?;
    let reader: StatusReader = cfg.status_reader().await?;

    let status = reader.status(&id).await?;
    match &status {
        JobStatus::Processing { stage } => {
            println!("Submission: {}", id);
            println!("Status: processing");
            if let Some(stage) = stage {
                println!("Stage: {}", stage);
            }
        }
        JobStatus::Failed { stage, error } => {
            println!("Submission: {}", id);
            println!("Status: failed ({})", stage);
            println!("Error: {}", error);
        }
        JobStatus::Completed { .. } => {
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}

fn show_config(cfg: &ResolvedConfig) -> Result<()> {
    println!("Pathways Configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:         {}", cfg.home.display());
    println!("  Local store:  {}", cfg.storage.local_dir.display());
    println!("  Queue:        {}", cfg.dispatch.queue_dir.display());
    println!();
    println!("Server:");
    println!("  Bind:         {}", cfg.server.bind);
    println!("  Max upload:   {} bytes", cfg.server.max_upload_bytes);
    println!();
    println!("Storage:");
    println!("  Backup:       {}", cfg.backup);
    println!(
        "  Bucket:       {}",
        cfg.storage.bucket.as_deref().unwrap_or("(not set)")
    );
    println!("  Region:       {}", cfg.storage.region);
    if let Some(endpoint) = &cfg.storage.endpoint {
        println!("  Endpoint:     {}", endpoint);
    }
    println!();
    println!("Dispatch:");
    println!("  Mode:         {}", cfg.dispatch.mode);
    println!("  Lease:        {}s", cfg.dispatch.queue.visibility_timeout.as_secs());
    println!("  Deliveries:   {}", cfg.dispatch.queue.max_deliveries);
    println!("  Retention:    {}h", cfg.dispatch.queue.retention.as_secs() / 3600);
    println!();
    println!("Transcription:");
    println!("  Provider:     {:?}", cfg.transcription.provider);
    println!("  Model:        {}", cfg.transcription.model);
    println!();
    println!("Generation:");
    println!("  Provider:     {:?}", cfg.generation.provider);
    println!("  Model:        {}", cfg.generation.model);
    println!("  Max tokens:   {}", cfg.generation.max_tokens);
    println!("  Temperature:  {}", cfg.generation.temperature);
    println!("  Attempts:     {}", cfg.generation.retry.max_attempts);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_commands() {
        let cli = Cli::try_parse_from(["pathways", "worker", "--once"]).unwrap();
        assert!(matches!(cli.command, Commands::Worker { once: true }));

        let cli = Cli::try_parse_from(["pathways", "serve", "--bind", "127.0.0.1:9001"]).unwrap();
        match cli.command {
            Commands::Serve { bind } => assert_eq!(bind.unwrap().port(), 9001),
            other => panic!("unexpected command: {:?}", other),
        }

        assert!(Cli::try_parse_from(["pathways", "status"]).is_err());
    }

    #[test]
    fn test_format_for_path() {
        assert_eq!(format_for_path(Path::new("memo.M4A")), AudioFormat::Mp4);
        assert_eq!(format_for_path(Path::new("note.opus")), AudioFormat::Ogg);
        assert_eq!(format_for_path(Path::new("clip")), AudioFormat::OctetStream);
    }
}

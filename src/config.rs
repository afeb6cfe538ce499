//! Configuration for pathways.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (PATHWAYS_HOME, BACKUP, AWS_BUCKET, DISPATCH_MODE, ...)
//! 2. Config file (.pathways/config.yaml)
//! 3. Defaults (~/.pathways)
//!
//! Config file discovery:
//! - Searches current directory and parents for .pathways/config.yaml
//! - Relative paths in the config file are resolved against the `.pathways/` directory
//!
//! API keys and store tokens are only ever read from the environment.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::adapters::{
    anthropic, openai, AnthropicConfig, AnthropicGenerator, CommandGenerator, Generator,
    OpenAiConfig, OpenAiTranscriber, Transcriber, WhisperTranscriber,
};
use crate::core::{
    BackupSink, Dispatcher, InProcessDispatcher, QueueDispatcher, RetryPolicy, StatusReader,
    TempScratch, Worker,
};
use crate::domain::Prompts;
use crate::ingest::{QueueOptions, SubmissionQueue};
use crate::store::{ArtifactStore, LocalDiskStore, RemoteObjectStore, RemoteStoreConfig};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

pub const DEFAULT_BIND: &str = "0.0.0.0:8000";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;
pub const DEFAULT_REGION: &str = "eu-west-2";
pub const DEFAULT_WHISPER_MODEL: &str = "base";

// ============================================================================
// Config file schema
// ============================================================================

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    pub home: Option<String>,
    pub backup: Option<String>,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub dispatch: DispatchSection,
    #[serde(default)]
    pub transcription: TranscriptionSection,
    #[serde(default)]
    pub generation: GenerationSection,
    #[serde(default)]
    pub prompts: PromptsSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerSection {
    pub bind: Option<String>,
    pub max_upload_bytes: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageSection {
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub local_dir: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DispatchSection {
    pub mode: Option<String>,
    pub queue_dir: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub visibility_timeout_secs: Option<u64>,
    pub max_deliveries: Option<u32>,
    pub retention_hours: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscriptionSection {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub whisper_path: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerationSection {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub timeout_secs: Option<u64>,
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    pub retry: Option<RetryPolicy>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromptsSection {
    pub greenpaper: Option<String>,
    pub mp: Option<String>,
}

// ============================================================================
// Resolved settings
// ============================================================================

/// Where best-effort stage backups go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupMode {
    Off,
    DurableStore,
    LocalDisk,
}

impl FromStr for BackupMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "off" | "none" | "false" => Ok(Self::Off),
            "durable-store" | "durable" | "s3" => Ok(Self::DurableStore),
            "local-disk" | "local" => Ok(Self::LocalDisk),
            other => anyhow::bail!(
                "Unknown backup mode '{}' (expected off, durable-store or local-disk)",
                other
            ),
        }
    }
}

impl std::fmt::Display for BackupMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Off => "off",
            Self::DurableStore => "durable-store",
            Self::LocalDisk => "local-disk",
        })
    }
}

/// How accepted submissions reach a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    InProcess,
    Queue,
}

impl FromStr for DispatchMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "in-process" | "inprocess" | "local" => Ok(Self::InProcess),
            "queue" => Ok(Self::Queue),
            other => anyhow::bail!("Unknown dispatch mode '{}' (expected in-process or queue)", other),
        }
    }
}

impl std::fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::InProcess => "in-process",
            Self::Queue => "queue",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptionProvider {
    OpenAi,
    Whisper,
}

impl FromStr for TranscriptionProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "whisper" => Ok(Self::Whisper),
            other => anyhow::bail!("Unknown transcription provider '{}'", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationProvider {
    Anthropic,
    Command,
}

impl FromStr for GenerationProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" => Ok(Self::Anthropic),
            "command" => Ok(Self::Command),
            other => anyhow::bail!("Unknown generation provider '{}'", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub bind: SocketAddr,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub bucket: Option<String>,
    pub region: String,
    pub endpoint: Option<String>,
    pub local_dir: PathBuf,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub mode: DispatchMode,
    pub queue_dir: PathBuf,
    pub poll_interval: Duration,
    pub queue: QueueOptions,
}

#[derive(Debug, Clone)]
pub struct TranscriptionSettings {
    pub provider: TranscriptionProvider,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
    pub whisper_path: String,
    pub language: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub provider: GenerationProvider,
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Default)]
pub struct PromptPaths {
    pub greenpaper: Option<PathBuf>,
    pub mp: Option<PathBuf>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to pathways home (queue, local artifacts)
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub server: ServerSettings,
    pub backup: BackupMode,
    pub storage: StorageSettings,
    pub dispatch: DispatchSettings,
    pub transcription: TranscriptionSettings,
    pub generation: GenerationSettings,
    pub prompts: PromptPaths,
}

// ============================================================================
// Loading
// ============================================================================

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".pathways").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

fn parse_env<T: FromStr>(name: &str, value: Option<String>) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    value
        .filter(|v| !v.trim().is_empty())
        .map(|v| {
            v.parse::<T>()
                .map_err(|e| anyhow::anyhow!("Invalid value for {}: {}", name, e))
        })
        .transpose()
}

/// Merge a config file, environment and defaults.
///
/// `env` looks up environment variables; tests pass a fixed map.
pub fn resolve(
    file: ConfigFile,
    config_path: Option<&Path>,
    default_home: PathBuf,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ResolvedConfig> {
    let base = config_path
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let path_from_file = |value: &Option<String>| value.as_deref().map(|v| resolve_path(&base, v));

    // Home
    let home = env("PATHWAYS_HOME")
        .map(PathBuf::from)
        .or_else(|| path_from_file(&file.home))
        .unwrap_or(default_home);

    // Server
    let bind_str = env("PATHWAYS_BIND")
        .or(file.server.bind.clone())
        .unwrap_or_else(|| DEFAULT_BIND.to_string());
    let server = ServerSettings {
        bind: bind_str
            .parse()
            .with_context(|| format!("Invalid bind address '{}'", bind_str))?,
        max_upload_bytes: parse_env("PATHWAYS_MAX_UPLOAD_BYTES", env("PATHWAYS_MAX_UPLOAD_BYTES"))?
            .or(file.server.max_upload_bytes)
            .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
    };

    // Backup
    let backup = match parse_env("BACKUP", env("BACKUP"))? {
        Some(mode) => mode,
        None => match &file.backup {
            Some(mode) => mode.parse()?,
            None => BackupMode::Off,
        },
    };

    // Storage
    let storage = StorageSettings {
        bucket: env("AWS_BUCKET").or(file.storage.bucket.clone()),
        region: env("AWS_REGION")
            .or(file.storage.region.clone())
            .unwrap_or_else(|| DEFAULT_REGION.to_string()),
        endpoint: env("PATHWAYS_STORE_ENDPOINT").or(file.storage.endpoint.clone()),
        local_dir: path_from_file(&file.storage.local_dir).unwrap_or_else(|| home.join("artifacts")),
        timeout: Duration::from_secs(file.storage.timeout_secs.unwrap_or(30)),
    };
    if backup == BackupMode::DurableStore && storage.bucket.is_none() {
        anyhow::bail!("Backup mode durable-store requires a bucket (AWS_BUCKET or storage.bucket)");
    }
    if backup == BackupMode::DurableStore && storage.endpoint.is_none() {
        anyhow::bail!(
            "Backup mode durable-store requires an endpoint (PATHWAYS_STORE_ENDPOINT or storage.endpoint)"
        );
    }

    // Dispatch
    let defaults = QueueOptions::default();
    let dispatch = DispatchSettings {
        mode: match parse_env("DISPATCH_MODE", env("DISPATCH_MODE"))? {
            Some(mode) => mode,
            None => match &file.dispatch.mode {
                Some(mode) => mode.parse()?,
                None => DispatchMode::InProcess,
            },
        },
        queue_dir: path_from_file(&file.dispatch.queue_dir).unwrap_or_else(|| home.join("queue")),
        poll_interval: Duration::from_millis(file.dispatch.poll_interval_ms.unwrap_or(1000)),
        queue: QueueOptions {
            visibility_timeout: file
                .dispatch
                .visibility_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.visibility_timeout),
            max_deliveries: file.dispatch.max_deliveries.unwrap_or(defaults.max_deliveries),
            retention: file
                .dispatch
                .retention_hours
                .map(|hours| Duration::from_secs(hours * 3600))
                .unwrap_or(defaults.retention),
        },
    };

    // Transcription
    let t = &file.transcription;
    let provider = match &t.provider {
        Some(p) => p.parse()?,
        None => TranscriptionProvider::OpenAi,
    };
    let transcription = TranscriptionSettings {
        provider,
        model: t.model.clone().unwrap_or_else(|| match provider {
            TranscriptionProvider::OpenAi => openai::DEFAULT_MODEL.to_string(),
            TranscriptionProvider::Whisper => DEFAULT_WHISPER_MODEL.to_string(),
        }),
        base_url: t
            .base_url
            .clone()
            .unwrap_or_else(|| openai::DEFAULT_BASE_URL.to_string()),
        timeout: Duration::from_secs(t.timeout_secs.unwrap_or(120)),
        whisper_path: env("WHISPER_PATH")
            .or(t.whisper_path.clone())
            .unwrap_or_else(|| "whisper".to_string()),
        language: t.language.clone(),
    };

    // Generation
    let g = &file.generation;
    let generation = GenerationSettings {
        provider: match &g.provider {
            Some(p) => p.parse()?,
            None => GenerationProvider::Anthropic,
        },
        model: g
            .model
            .clone()
            .unwrap_or_else(|| anthropic::DEFAULT_MODEL.to_string()),
        base_url: g
            .base_url
            .clone()
            .unwrap_or_else(|| anthropic::DEFAULT_BASE_URL.to_string()),
        max_tokens: g.max_tokens.unwrap_or(8192),
        temperature: g.temperature.unwrap_or(0.6),
        timeout: Duration::from_secs(g.timeout_secs.unwrap_or(180)),
        command: g.command.clone(),
        args: g.args.clone(),
        retry: g.retry.clone().unwrap_or_else(RetryPolicy::none),
    };
    if generation.provider == GenerationProvider::Command && generation.command.is_none() {
        anyhow::bail!("generation.provider is 'command' but generation.command is not set");
    }

    let prompts = PromptPaths {
        greenpaper: path_from_file(&file.prompts.greenpaper),
        mp: path_from_file(&file.prompts.mp),
    };

    Ok(ResolvedConfig {
        home,
        config_file: config_path.map(Path::to_path_buf),
        server,
        backup,
        storage,
        dispatch,
        transcription,
        generation,
        prompts,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".pathways");

    let config_file = find_config_file();
    let file = match &config_file {
        Some(path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    resolve(file, config_file.as_deref(), default_home, |name| {
        std::env::var(name).ok()
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

// ============================================================================
// Wiring
// ============================================================================

impl ResolvedConfig {
    /// Store holding results and state records.
    ///
    /// The durable store when backups go there, the local disk otherwise.
    pub async fn primary_store(&self) -> Result<Arc<dyn ArtifactStore>> {
        match self.backup {
            BackupMode::DurableStore => {
                let store = RemoteObjectStore::new(&RemoteStoreConfig {
                    bucket: self.storage.bucket.clone().unwrap_or_default(),
                    endpoint: self.storage.endpoint.clone(),
                    token: std::env::var("PATHWAYS_STORE_TOKEN").ok(),
                    timeout: self.storage.timeout,
                })?;
                Ok(Arc::new(store))
            }
            BackupMode::LocalDisk | BackupMode::Off => {
                let store = LocalDiskStore::open(&self.storage.local_dir)
                    .await
                    .with_context(|| {
                        format!("Failed to open local store at {}", self.storage.local_dir.display())
                    })?;
                Ok(Arc::new(store))
            }
        }
    }

    /// Side channel for stage backups over `store`
    pub fn backup_sink(&self, store: Arc<dyn ArtifactStore>) -> BackupSink {
        match self.backup {
            BackupMode::Off => BackupSink::disabled(),
            BackupMode::DurableStore | BackupMode::LocalDisk => BackupSink::new(store),
        }
    }

    pub fn transcriber(&self) -> Result<Arc<dyn Transcriber>> {
        let t = &self.transcription;
        match t.provider {
            TranscriptionProvider::OpenAi => Ok(Arc::new(OpenAiTranscriber::new(OpenAiConfig {
                api_key: std::env::var("OPENAI_API_KEY").unwrap_or_default(),
                base_url: t.base_url.clone(),
                model: t.model.clone(),
                timeout: t.timeout,
            })?)),
            TranscriptionProvider::Whisper => {
                let mut whisper = WhisperTranscriber::new(&t.whisper_path, &t.model, t.timeout);
                if let Some(language) = &t.language {
                    whisper = whisper.with_language(language);
                }
                Ok(Arc::new(whisper))
            }
        }
    }

    pub fn generator(&self) -> Result<Arc<dyn Generator>> {
        let g = &self.generation;
        match g.provider {
            GenerationProvider::Anthropic => {
                Ok(Arc::new(AnthropicGenerator::new(AnthropicConfig {
                    api_key: std::env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
                    base_url: g.base_url.clone(),
                    model: g.model.clone(),
                    max_tokens: g.max_tokens,
                    temperature: g.temperature,
                    timeout: g.timeout,
                })?))
            }
            GenerationProvider::Command => {
                let program = g
                    .command
                    .clone()
                    .context("generation.command is required for the command provider")?;
                Ok(Arc::new(CommandGenerator::new(program, g.args.clone(), g.timeout)))
            }
        }
    }

    pub fn prompts(&self) -> Result<Prompts> {
        Prompts::load(self.prompts.greenpaper.as_deref(), self.prompts.mp.as_deref())
    }

    /// Fully wired worker
    pub async fn worker(&self) -> Result<Worker> {
        let store = self.primary_store().await?;
        let scratch = TempScratch::new().context("Failed to create scratch directory")?;

        let worker = Worker::new(
            store.clone(),
            self.transcriber()?,
            self.generator()?,
            Arc::new(scratch),
        )
        .with_backups(self.backup_sink(store))
        .with_prompts(self.prompts()?)
        .with_retry(self.generation.retry.clone());

        Ok(worker)
    }

    pub async fn queue(&self) -> Result<Arc<SubmissionQueue>> {
        let queue = SubmissionQueue::open(&self.dispatch.queue_dir, self.dispatch.queue.clone())
            .await
            .with_context(|| {
                format!("Failed to open queue at {}", self.dispatch.queue_dir.display())
            })?;
        Ok(Arc::new(queue))
    }

    /// Dispatcher for the configured mode.
    ///
    /// Queue mode needs no clients in this process; only workers build them.
    pub async fn dispatcher(&self) -> Result<Arc<dyn Dispatcher>> {
        let dispatcher: Arc<dyn Dispatcher> = match self.dispatch.mode {
            DispatchMode::InProcess => Arc::new(InProcessDispatcher::new(self.worker().await?)),
            DispatchMode::Queue => Arc::new(QueueDispatcher::new(self.queue().await?)),
        };
        info!(mode = dispatcher.mode(), "Dispatcher ready");
        Ok(dispatcher)
    }

    pub async fn status_reader(&self) -> Result<StatusReader> {
        Ok(StatusReader::new(self.primary_store().await?))
    }
}

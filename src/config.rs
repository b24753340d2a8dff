//! TOML configuration.
//!
//! Every tunable carries a serde default so a minimal file only needs the
//! sections for the sources actually used. [`load_config`] validates the
//! result; configuration errors are fatal to a run.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::RemoteRoot;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub connectors: ConnectorsConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Batch, concurrency, retry and scratch-space settings for `docsync sync`.
#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_concurrent_transfers")]
    pub max_concurrent_transfers: usize,
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
    #[serde(default = "default_render_dir")]
    pub render_dir: PathBuf,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_concurrent_transfers: default_max_concurrent_transfers(),
            staging_dir: default_staging_dir(),
            render_dir: default_render_dir(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_batch_size() -> usize {
    50
}
fn default_max_concurrent_transfers() -> usize {
    10
}
fn default_staging_dir() -> PathBuf {
    PathBuf::from("./data/staging")
}
fn default_render_dir() -> PathBuf {
    PathBuf::from("./data/rendered")
}

/// Retry policy for transient transfer failures.
#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_floor")]
    pub backoff_floor_secs: f64,
    #[serde(default = "default_backoff_ceiling")]
    pub backoff_ceiling_secs: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_floor_secs: default_backoff_floor(),
            backoff_ceiling_secs: default_backoff_ceiling(),
        }
    }
}

impl RetryConfig {
    pub fn floor(&self) -> Duration {
        Duration::from_secs_f64(self.backoff_floor_secs)
    }

    pub fn ceiling(&self) -> Duration {
        Duration::from_secs_f64(self.backoff_ceiling_secs)
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_floor() -> f64 {
    4.0
}
fn default_backoff_ceiling() -> f64 {
    60.0
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConnectorsConfig {
    pub filesystem: Option<FilesystemConnectorConfig>,
    pub remote: Option<RemoteConnectorConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemConnectorConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.pptx".to_string(),
        "**/*.docx".to_string(),
        "**/*.pdf".to_string(),
    ]
}

/// A remote document library exposed through a Graph-style drive API.
#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConnectorConfig {
    #[serde(default = "default_remote_base_url")]
    pub base_url: String,
    /// Libraries walked on every run. A root that cannot be listed is skipped
    /// while the others still contribute items.
    pub roots: Vec<RemoteRoot>,
    /// Environment variable holding the bearer token issued by the credential helper.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_remote_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_remote_timeout")]
    pub timeout_secs: u64,
}

fn default_remote_base_url() -> String {
    "https://graph.microsoft.com/v1.0".to_string()
}
fn default_token_env() -> String {
    "DOCSYNC_REMOTE_TOKEN".to_string()
}
fn default_remote_extensions() -> Vec<String> {
    vec!["pptx".to_string(), "docx".to_string(), "pdf".to_string()]
}
fn default_max_depth() -> usize {
    32
}
fn default_remote_timeout() -> u64 {
    60
}

/// Page rendering collaborator.
///
/// With `provider = "command"`, `program` is run once per document with
/// `{input}` and `{output_dir}` substituted in `args`; every PNG it leaves in
/// the output directory is taken as one rendered unit, in file-name order.
#[derive(Debug, Deserialize, Clone)]
pub struct RenderConfig {
    #[serde(default = "default_render_provider")]
    pub provider: String,
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_render_timeout")]
    pub timeout_secs: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            provider: default_render_provider(),
            program: None,
            args: Vec::new(),
            timeout_secs: default_render_timeout(),
        }
    }
}

impl RenderConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_render_provider() -> String {
    "disabled".to_string()
}
fn default_render_timeout() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_embed_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "hash".to_string()
}
fn default_embed_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("./data/index.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional log file; appended to, never rotated.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.sync.batch_size == 0 {
        bail!("sync.batch_size must be > 0");
    }
    if config.sync.max_concurrent_transfers == 0 {
        bail!("sync.max_concurrent_transfers must be > 0");
    }

    let retry = &config.sync.retry;
    if retry.max_attempts == 0 {
        bail!("sync.retry.max_attempts must be >= 1");
    }
    if !(retry.backoff_floor_secs >= 0.0 && retry.backoff_floor_secs.is_finite()) {
        bail!("sync.retry.backoff_floor_secs must be a non-negative number");
    }
    if !(retry.backoff_ceiling_secs >= retry.backoff_floor_secs
        && retry.backoff_ceiling_secs.is_finite())
    {
        bail!("sync.retry.backoff_ceiling_secs must be >= backoff_floor_secs");
    }

    match config.render.provider.as_str() {
        "disabled" => {}
        "command" => {
            if config.render.program.is_none() {
                bail!("render.program must be set when render.provider is 'command'");
            }
        }
        other => bail!(
            "Unknown render provider: '{}'. Must be disabled or command.",
            other
        ),
    }

    match config.embedding.provider.as_str() {
        "disabled" | "hash" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hash, openai, ollama, or local.",
            other
        ),
    }

    if config.embedding.dims == Some(0)
        || (matches!(config.embedding.provider.as_str(), "openai" | "ollama")
            && config.embedding.dims.is_none())
    {
        bail!(
            "embedding.dims must be > 0 when provider is '{}'",
            config.embedding.provider
        );
    }
    if matches!(config.embedding.provider.as_str(), "openai" | "ollama")
        && config.embedding.model.is_none()
    {
        bail!(
            "embedding.model must be specified when provider is '{}'",
            config.embedding.provider
        );
    }

    if let Some(remote) = &config.connectors.remote {
        if remote.roots.is_empty() {
            bail!("connectors.remote.roots must list at least one drive");
        }
        if remote.roots.iter().any(|r| r.drive_id.trim().is_empty()) {
            bail!("connectors.remote.roots: drive_id must not be empty");
        }
        if remote.max_depth == 0 {
            bail!("connectors.remote.max_depth must be > 0");
        }
    }

    Ok(())
}

//! Page rendering collaborators.
//!
//! [`CommandRenderer`] shells out to an external converter (for example a
//! headless office suite followed by a PDF rasterizer wrapped in a script).
//! Such programs typically allow one instance per user session, so calls
//! are serialized behind a mutex.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::RenderConfig;
use crate::traits::Renderer;

/// Renderer used when `render.provider = "disabled"`. Produces no images.
pub struct DisabledRenderer;

#[async_trait]
impl Renderer for DisabledRenderer {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn render(&self, _input: &Path, _output_dir: &Path) -> Result<Vec<PathBuf>> {
        Ok(Vec::new())
    }
}

/// Runs `program args...` once per document, with `{input}` and
/// `{output_dir}` substituted, and collects the PNGs it leaves behind.
pub struct CommandRenderer {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    lock: Mutex<()>,
}

impl CommandRenderer {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
            lock: Mutex::new(()),
        }
    }

    fn expand_args(&self, input: &Path, output_dir: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let output_dir = output_dir.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{input}", &input)
                    .replace("{output_dir}", &output_dir)
            })
            .collect()
    }
}

#[async_trait]
impl Renderer for CommandRenderer {
    async fn render(&self, input: &Path, output_dir: &Path) -> Result<Vec<PathBuf>> {
        let _guard = self.lock.lock().await;

        if output_dir.exists() {
            tokio::fs::remove_dir_all(output_dir).await.with_context(|| {
                format!("Failed to clear render directory {}", output_dir.display())
            })?;
        }
        tokio::fs::create_dir_all(output_dir).await?;

        let args = self.expand_args(input, output_dir);
        tracing::debug!(program = %self.program, ?args, "running renderer");

        let mut command = tokio::process::Command::new(&self.program);
        command.args(&args).kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "renderer timed out after {}s",
                    self.timeout.as_secs()
                )
            })?
            .with_context(|| format!("Failed to run renderer '{}'", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "renderer exited with {}: {}",
                output.status,
                stderr.trim()
            );
        }

        collect_images(output_dir).await
    }
}

/// PNG files in `dir`, sorted by natural (numeric-aware) file-name order.
async fn collect_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_png = path
            .extension()
            .map_or(false, |e| e.eq_ignore_ascii_case("png"));
        if is_png && entry.file_type().await?.is_file() {
            images.push(path);
        }
    }
    images.sort_by_key(|p| natural_key(p));
    Ok(images)
}

/// Sort key splitting the file stem into its trailing number, so `slide2` sorts before `slide10`.
fn natural_key(path: &Path) -> (String, u64, String) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let digits_at = stem
        .rfind(|c: char| !c.is_ascii_digit())
        .map_or(0, |i| i + 1);
    let (prefix, digits) = stem.split_at(digits_at);
    let number = digits.parse::<u64>().unwrap_or(0);
    (prefix.to_string(), number, stem.clone())
}

pub fn create_renderer(config: &RenderConfig) -> Result<Arc<dyn Renderer>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledRenderer)),
        "command" => {
            let program = config
                .program
                .clone()
                .ok_or_else(|| anyhow::anyhow!("render.program required for command renderer"))?;
            Ok(Arc::new(CommandRenderer::new(
                program,
                config.args.clone(),
                Duration::from_secs(config.timeout_secs),
            )))
        }
        other => bail!("Unknown render provider: {}", other),
    }
}

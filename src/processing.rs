//! Per-item processing envelope.
//!
//! Runs extract → render → embed → index for one staged document. Any
//! collaborator failure stops the remaining steps, is recorded as `failed`
//! and reported back as [`ItemResult::Failed`]; it never aborts the batch.
//! Only state-store failures propagate, since continuing without reliable
//! state would reintroduce duplicate work.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::embedding::EmbeddingProvider;
use crate::error::{ProcessingError, ProcessingStep, Result, SyncError};
use crate::models::{IndexUnit, ItemDescriptor, ItemStatus, LogEvent, ResultMetrics};
use crate::state::{StateStore, TransitionFields};
use crate::traits::{Extractor, Renderer, VectorIndex};
use crate::transfer::StagedFile;

/// Outcome of a successful item.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutcome {
    pub derived_id: String,
    pub metrics: ResultMetrics,
}

#[derive(Debug, Clone)]
pub enum ItemResult {
    Success(ProcessOutcome),
    Failed(ProcessingError),
}

impl ItemResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ItemResult::Success(_))
    }
}

pub struct ProcessingStage {
    store: StateStore,
    extractor: Arc<dyn Extractor>,
    renderer: Arc<dyn Renderer>,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    render_root: PathBuf,
}

impl ProcessingStage {
    pub fn new(
        store: StateStore,
        extractor: Arc<dyn Extractor>,
        renderer: Arc<dyn Renderer>,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        render_root: PathBuf,
    ) -> Self {
        Self {
            store,
            extractor,
            renderer,
            embedder,
            index,
            render_root,
        }
    }

    /// Process one `pending` item that has been staged.
    pub async fn process(&self, staged: &StagedFile, item: &ItemDescriptor) -> Result<ItemResult> {
        let previous_derived = self
            .store
            .get(&item.identity)
            .await?
            .and_then(|record| record.derived_id);

        self.store
            .transition(&item.identity, ItemStatus::Processing, TransitionFields::default())
            .await?;

        let started = Instant::now();
        match self
            .run_steps(staged.path(), item, previous_derived.as_deref(), started)
            .await
        {
            Ok(outcome) => {
                self.store
                    .transition(
                        &item.identity,
                        ItemStatus::Success,
                        TransitionFields::success(outcome.derived_id.clone(), outcome.metrics),
                    )
                    .await?;
                self.store
                    .append_log(
                        &item.identity,
                        LogEvent::Outcome,
                        &format!(
                            "success: {} unit(s) in {:.2}s as {}",
                            outcome.metrics.unit_count,
                            outcome.metrics.duration_secs,
                            outcome.derived_id
                        ),
                    )
                    .await?;
                tracing::info!(
                    identity = %item.identity,
                    name = %item.display_name,
                    units = outcome.metrics.unit_count,
                    "processed"
                );
                Ok(ItemResult::Success(outcome))
            }
            Err(SyncError::Processing(err)) => {
                let message = err.to_string();
                self.store
                    .transition(
                        &item.identity,
                        ItemStatus::Failed,
                        TransitionFields::failed(message.clone()),
                    )
                    .await?;
                self.store
                    .append_log(&item.identity, LogEvent::Outcome, &format!("failed: {}", message))
                    .await?;
                tracing::warn!(identity = %item.identity, name = %item.display_name, error = %message, "processing failed");
                Ok(ItemResult::Failed(err))
            }
            Err(fatal) => Err(fatal),
        }
    }

    async fn run_steps(
        &self,
        path: &Path,
        item: &ItemDescriptor,
        previous_derived: Option<&str>,
        started: Instant,
    ) -> Result<ProcessOutcome> {
        let derived_id = content_id(path)
            .await
            .map_err(|e| ProcessingError::new(ProcessingStep::Fingerprint, e))?;

        let units = self
            .extractor
            .extract(path)
            .await
            .map_err(|e| ProcessingError::new(ProcessingStep::Extract, format!("{:#}", e)))?;
        self.store
            .append_log(
                &item.identity,
                LogEvent::Extract,
                &format!("{} unit(s) extracted", units.len()),
            )
            .await?;

        let images = if self.renderer.is_enabled() {
            let output_dir = self.render_root.join(&derived_id);
            let images = self
                .renderer
                .render(path, &output_dir)
                .await
                .map_err(|e| ProcessingError::new(ProcessingStep::Render, format!("{:#}", e)))?;
            let message = if images.len() == units.len() {
                format!("{} image(s) rendered", images.len())
            } else {
                tracing::warn!(
                    identity = %item.identity,
                    extracted = units.len(),
                    rendered = images.len(),
                    "rendered and extracted unit counts differ"
                );
                format!(
                    "{} image(s) rendered for {} extracted unit(s)",
                    images.len(),
                    units.len()
                )
            };
            self.store
                .append_log(&item.identity, LogEvent::Render, &message)
                .await?;
            images
        } else {
            Vec::new()
        };

        let texts: Vec<String> = units.iter().map(|u| u.embedding_text()).collect();
        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            self.embedder
                .embed(&texts)
                .await
                .map_err(|e| ProcessingError::new(ProcessingStep::Embed, format!("{:#}", e)))?
        };
        if vectors.len() != texts.len() {
            return Err(ProcessingError::new(
                ProcessingStep::Embed,
                format!("{} vector(s) returned for {} text(s)", vectors.len(), texts.len()),
            )
            .into());
        }
        self.store
            .append_log(
                &item.identity,
                LogEvent::Embed,
                &format!("{} vector(s) from {}", vectors.len(), self.embedder.model_name()),
            )
            .await?;

        let index_units: Vec<IndexUnit> = units
            .iter()
            .zip(texts)
            .enumerate()
            .map(|(i, (unit, text))| IndexUnit {
                unit_index: unit.unit_index,
                text,
                image_path: images.get(i).map(|p| p.to_string_lossy().to_string()),
            })
            .collect();
        self.index
            .upsert_units(&derived_id, &item.display_name, &index_units, &vectors)
            .await
            .map_err(|e| ProcessingError::new(ProcessingStep::Index, format!("{:#}", e)))?;

        let mut index_message = format!("{} unit(s) indexed as {}", index_units.len(), derived_id);
        if let Some(stale) = previous_derived.filter(|prev| *prev != derived_id) {
            if self.store.derived_id_in_use(stale, &item.identity).await? {
                index_message.push_str(&format!(", kept {} (still referenced)", stale));
            } else {
                self.retire(stale).await?;
                index_message.push_str(&format!(", replaced {}", stale));
            }
        }
        self.store
            .append_log(&item.identity, LogEvent::Index, &index_message)
            .await?;

        Ok(ProcessOutcome {
            derived_id,
            metrics: ResultMetrics {
                unit_count: index_units.len() as i64,
                duration_secs: started.elapsed().as_secs_f64(),
            },
        })
    }

    /// Remove a derived document nothing references any more: its index
    /// entries and its rendered images.
    async fn retire(&self, derived_id: &str) -> Result<()> {
        self.index
            .remove_document(derived_id)
            .await
            .map_err(|e| ProcessingError::new(ProcessingStep::Index, format!("{:#}", e)))?;

        let images = self.render_root.join(derived_id);
        match tokio::fs::remove_dir_all(&images).await {
            Ok(()) => tracing::debug!(dir = %images.display(), "removed stale renders"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(dir = %images.display(), error = %e, "could not remove stale renders");
            }
        }
        Ok(())
    }
}

/// First 16 hex chars of SHA-256 over the file contents.
pub async fn content_id(path: &Path) -> std::io::Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut file, &mut hasher)?;
        Ok::<_, std::io::Error>(format!("{:x}", hasher.finalize())[..16].to_string())
    })
    .await
    .map_err(std::io::Error::other)?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn content_id_depends_on_bytes_only() {
        let tmp = tempfile::TempDir::new().unwrap();
        let a = tmp.path().join("a.pptx");
        let b = tmp.path().join("b.pptx");
        std::fs::write(&a, b"same").unwrap();
        std::fs::write(&b, b"same").unwrap();

        let id_a = content_id(&a).await.unwrap();
        assert_eq!(id_a.len(), 16);
        assert_eq!(id_a, content_id(&b).await.unwrap());

        std::fs::write(&b, b"different").unwrap();
        assert_ne!(id_a, content_id(&b).await.unwrap());
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(content_id(&tmp.path().join("nope")).await.is_err());
    }
}

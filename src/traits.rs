//! Collaborator seams of the sync pipeline.
//!
//! The orchestrator only talks to sources and processing backends through
//! the traits in this module, so each one can be swapped for a different
//! implementation (or a test double) without touching the pipeline:
//!
//! ```text
//!   Connector ──▶ plan_work ──▶ TransferStage ──▶ ProcessingStage
//!   (discover)     (state)      (RemoteSource)    (Extractor, Renderer,
//!                                                  EmbeddingProvider,
//!                                                  VectorIndex)
//! ```
//!
//! The embedding seam lives in [`crate::embedding`] next to its providers.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::error::SourceError;
use crate::models::{ExtractedUnit, IndexUnit, ItemDescriptor, RemoteRoot, SearchHit};

// ═══════════════════════════════════════════════════════════════════════
// Discovery
// ═══════════════════════════════════════════════════════════════════════

/// A document source that enumerates candidate items.
///
/// Discovery is read-only: it never consults or mutates the state store.
/// An error returned here aborts the run before any item is touched.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Instance name shown in logs and run summaries.
    fn name(&self) -> &str;

    /// Connector type identifier (`"filesystem"`, `"remote"`, ...).
    fn connector_type(&self) -> &str;

    /// `"{type}:{name}"`.
    fn source_label(&self) -> String {
        format!("{}:{}", self.connector_type(), self.name())
    }

    /// Enumerate every candidate item. Order carries no meaning.
    async fn discover(&self) -> Result<Vec<ItemDescriptor>>;
}

/// One child of a remote folder listing.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntry {
    /// Drive the entry lives in.
    pub drive_id: String,
    pub id: String,
    pub name: String,
    /// Path of the entry relative to the drive root, e.g. `/Decks/q3.pptx`.
    pub path: String,
    pub is_folder: bool,
    pub size: u64,
    pub modified: DateTime<Utc>,
    /// Tag that changes only when the content changes, when the source exposes one.
    pub ctag: Option<String>,
    /// Entity tag; also changes on metadata-only edits such as renames.
    pub etag: Option<String>,
    /// Pre-authorized download link, when the listing includes one.
    pub download_url: Option<String>,
}

/// Low-level access to a remote document library.
///
/// Implementations classify failures as [`SourceError::Transient`] or
/// [`SourceError::Permanent`]; the transfer stage retries only the former.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// List the top-level children of a configured root.
    async fn list_root(
        &self,
        root: &RemoteRoot,
    ) -> std::result::Result<Vec<RemoteEntry>, SourceError>;

    /// List the children of a folder found while walking.
    async fn list_children(
        &self,
        folder: &RemoteEntry,
    ) -> std::result::Result<Vec<RemoteEntry>, SourceError>;

    /// Write the content of `item_id` in `drive_id` to `dest`.
    ///
    /// `dest` must either hold the complete content or not exist when this
    /// returns.
    async fn download(
        &self,
        drive_id: &str,
        item_id: &str,
        download_url: Option<&str>,
        dest: &Path,
    ) -> std::result::Result<(), SourceError>;
}

// ═══════════════════════════════════════════════════════════════════════
// Processing collaborators
// ═══════════════════════════════════════════════════════════════════════

/// Turns a staged document into ordered units of text.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<Vec<ExtractedUnit>>;
}

/// Renders each unit of a document into an image.
///
/// Rendering may depend on a single-instance external program; callers
/// must not assume it is safe to run in parallel, and implementations
/// serialize internally when it is not.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Whether the renderer produces anything at all.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Render `input` into `output_dir` and return the image paths in unit order.
    async fn render(&self, input: &Path, output_dir: &Path) -> Result<Vec<PathBuf>>;
}

/// Vector storage for processed documents.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Replace every unit stored for `document_id` with `units`.
    ///
    /// `vectors[i]` is the embedding of `units[i]`.
    async fn upsert_units(
        &self,
        document_id: &str,
        display_name: &str,
        units: &[IndexUnit],
        vectors: &[Vec<f32>],
    ) -> Result<()>;

    /// Remove every unit stored for `document_id`. Removing an unknown id is a no-op.
    async fn remove_document(&self, document_id: &str) -> Result<()>;

    /// Up to `top_k` units ranked by similarity, best first, above `min_score`.
    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        min_score: Option<f32>,
    ) -> Result<Vec<SearchHit>>;
}

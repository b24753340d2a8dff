//! Core data models used throughout docsync.
//!
//! These types represent the tracked items, their processing status, the
//! descriptors produced by discovery, and the payloads exchanged with the
//! extraction, rendering, embedding and index collaborators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Processing status of a tracked item.
///
/// ```text
/// (no record) ──discover──▶ Pending ──begin──▶ Processing ──ok──▶ Success
///                              │                    │
///                              └─transfer failed─┐  └──error──▶ Failed
///                                                ▼
///                                              Failed
/// ```
///
/// `Success`, `Failed` and dangling `Processing` rows return to `Pending`
/// only through registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

impl ItemStatus {
    pub const ALL: [ItemStatus; 4] = [
        ItemStatus::Pending,
        ItemStatus::Processing,
        ItemStatus::Success,
        ItemStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Processing => "processing",
            ItemStatus::Success => "success",
            ItemStatus::Failed => "failed",
        }
    }

    /// Whether `self -> next` is a legal transition outside of registration.
    pub fn can_transition_to(&self, next: ItemStatus) -> bool {
        matches!(
            (self, next),
            (ItemStatus::Pending, ItemStatus::Processing)
                | (ItemStatus::Pending, ItemStatus::Failed)
                | (ItemStatus::Processing, ItemStatus::Success)
                | (ItemStatus::Processing, ItemStatus::Failed)
        )
    }

    /// Terminal statuses stamp `processed_at`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Success | ItemStatus::Failed)
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ItemStatus::Pending),
            "processing" => Ok(ItemStatus::Processing),
            "success" => Ok(ItemStatus::Success),
            "failed" => Ok(ItemStatus::Failed),
            other => Err(format!("unknown item status: '{}'", other)),
        }
    }
}

/// Metrics recorded on a successful processing run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResultMetrics {
    /// Number of produced units (slides, pages, sheets).
    pub unit_count: i64,
    /// Wall-clock processing time in seconds.
    pub duration_secs: f64,
}

/// Durable record for one tracked item, keyed by `identity`.
#[derive(Debug, Clone, Serialize)]
pub struct ItemRecord {
    pub identity: String,
    pub source_locator: String,
    pub fingerprint: String,
    pub size: i64,
    pub last_modified: DateTime<Utc>,
    pub status: ItemStatus,
    pub derived_id: Option<String>,
    pub metrics: Option<ResultMetrics>,
    pub error_message: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Where the content of a discovered item can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// A file on local disk, processed in place.
    Local(PathBuf),
    /// An item in a remote document library.
    Remote {
        drive_id: String,
        item_id: String,
        download_url: Option<String>,
    },
}

/// A folder inside a remote drive where discovery starts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteRoot {
    pub drive_id: String,
    /// Folder path inside the drive; empty means the drive root.
    #[serde(default)]
    pub path: String,
}

impl RemoteRoot {
    pub fn new(drive_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            drive_id: drive_id.into(),
            path: path.into().trim_matches('/').to_string(),
        }
    }

    /// `"{drive}:/{path}"`, for logs.
    pub fn label(&self) -> String {
        format!("{}:/{}", self.drive_id, self.path.trim_matches('/'))
    }
}

/// An item produced by discovery, before any state has been consulted.
#[derive(Debug, Clone)]
pub struct ItemDescriptor {
    /// Stable key for the state store.
    pub identity: String,
    /// Human-readable location (absolute path or remote path).
    pub source_locator: String,
    pub display_name: String,
    pub modified: DateTime<Utc>,
    pub size: u64,
    /// Change-detection value (content tag or size+mtime composite).
    pub fingerprint: String,
    pub locator: Locator,
}

impl ItemDescriptor {
    /// File extension of the display name, lowercased, if any.
    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.display_name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
    }
}

/// Pipeline step recorded in the processing log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogEvent {
    Transfer,
    Extract,
    Render,
    Embed,
    Index,
    Outcome,
}

impl LogEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogEvent::Transfer => "transfer",
            LogEvent::Extract => "extract",
            LogEvent::Render => "render",
            LogEvent::Embed => "embed",
            LogEvent::Index => "index",
            LogEvent::Outcome => "outcome",
        }
    }
}

/// Append-only audit entry. Never read back by the pipeline itself.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingLogEntry {
    pub identity: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub message: String,
}

/// Per-status row counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: i64,
    pub processing: i64,
    pub success: i64,
    pub failed: i64,
}

impl StatusCounts {
    pub fn get(&self, status: ItemStatus) -> i64 {
        match status {
            ItemStatus::Pending => self.pending,
            ItemStatus::Processing => self.processing,
            ItemStatus::Success => self.success,
            ItemStatus::Failed => self.failed,
        }
    }

    pub fn set(&mut self, status: ItemStatus, count: i64) {
        match status {
            ItemStatus::Pending => self.pending = count,
            ItemStatus::Processing => self.processing = count,
            ItemStatus::Success => self.success = count,
            ItemStatus::Failed => self.failed = count,
        }
    }

    pub fn total(&self) -> i64 {
        self.pending + self.processing + self.success + self.failed
    }
}

/// Aggregate view of the state store, computed on demand.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Statistics {
    pub counts_by_status: StatusCounts,
    /// Sum of unit counts over successful items.
    pub total_units: i64,
    pub average_duration_secs: Option<f64>,
    pub last_success_at: Option<DateTime<Utc>>,
}

/// Result of one orchestrator run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Random id attached to every log line of the run.
    pub run_id: String,
    pub discovered: u64,
    pub skipped: u64,
    pub processed: u64,
    pub failed: u64,
    pub duration_secs: f64,
    pub interrupted: bool,
    pub statistics: Statistics,
}

impl RunSummary {
    /// True when no item failed and the run was not interrupted.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && !self.interrupted
    }
}

/// One unit (slide, page, sheet) returned by the extraction collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedUnit {
    /// 1-based position in the document.
    pub unit_index: u32,
    pub primary_text: String,
    /// Secondary text such as speaker notes; empty when absent.
    pub secondary_text: String,
}

impl ExtractedUnit {
    /// Text submitted to the embedding collaborator.
    pub fn embedding_text(&self) -> String {
        let primary = self.primary_text.trim();
        let secondary = self.secondary_text.trim();
        match (primary.is_empty(), secondary.is_empty()) {
            (_, true) => primary.to_string(),
            (true, false) => secondary.to_string(),
            (false, false) => format!("{}\n\n{}", primary, secondary),
        }
    }
}

/// A unit as written to the index collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexUnit {
    pub unit_index: u32,
    pub text: String,
    pub image_path: Option<String>,
}

/// A ranked search result returned by the index collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub score: f32,
    pub document_id: String,
    pub display_name: String,
    pub unit_index: u32,
    pub text: String,
    pub image_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in ItemStatus::ALL {
            assert_eq!(status.as_str().parse::<ItemStatus>().unwrap(), status);
        }
        assert!("done".parse::<ItemStatus>().is_err());
    }

    #[test]
    fn transition_table() {
        use ItemStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Success));
        assert!(Processing.can_transition_to(Failed));

        assert!(!Success.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Processing));
        assert!(!Pending.can_transition_to(Success));
        assert!(!Processing.can_transition_to(Processing));
    }

    #[test]
    fn embedding_text_joins_notes() {
        let unit = ExtractedUnit {
            unit_index: 1,
            primary_text: " Title ".into(),
            secondary_text: "notes".into(),
        };
        assert_eq!(unit.embedding_text(), "Title\n\nnotes");

        let bare = ExtractedUnit {
            unit_index: 2,
            primary_text: "only body".into(),
            secondary_text: String::new(),
        };
        assert_eq!(bare.embedding_text(), "only body");
    }
}

//! Error taxonomy for the sync pipeline.
//!
//! Per-item failures ([`SyncError::TransientTransfer`], [`SyncError::PermanentSource`],
//! [`SyncError::Processing`]) are caught at the item boundary and recorded in the
//! state store. Everything else is fatal to the run: continuing without a reliable
//! state store would reintroduce duplicate work.

use thiserror::Error;

use crate::models::ItemStatus;

/// Error returned by a remote source collaborator.
///
/// The two classes must stay distinguishable: the transfer stage retries
/// only [`SourceError::Transient`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Network failure, timeout, throttling or a server-side error.
    #[error("transient source error: {0}")]
    Transient(String),

    /// Not found, permission denied or another request the source will never accept.
    #[error("permanent source error: {0}")]
    Permanent(String),
}

impl SourceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Transient(_))
    }

    /// Classify an HTTP status code returned by a remote source.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = format!(
            "HTTP {}: {}",
            status,
            body.chars().take(300).collect::<String>()
        );
        match status {
            408 | 429 | 500..=599 => SourceError::Transient(message),
            _ => SourceError::Permanent(message),
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => SourceError::from_status(status.as_u16(), &err.to_string()),
            None => SourceError::Transient(err.to_string()),
        }
    }
}

impl From<std::io::Error> for SourceError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                SourceError::Permanent(err.to_string())
            }
            _ => SourceError::Transient(err.to_string()),
        }
    }
}

/// The collaborator step in which processing failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStep {
    Fingerprint,
    Extract,
    Render,
    Embed,
    Index,
}

impl ProcessingStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStep::Fingerprint => "fingerprint",
            ProcessingStep::Extract => "extract",
            ProcessingStep::Render => "render",
            ProcessingStep::Embed => "embed",
            ProcessingStep::Index => "index",
        }
    }
}

impl std::fmt::Display for ProcessingStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A collaborator failure during extract/render/embed/index.
#[derive(Error, Debug, Clone)]
#[error("{step} failed: {message}")]
pub struct ProcessingError {
    pub step: ProcessingStep,
    pub message: String,
}

impl ProcessingError {
    pub fn new(step: ProcessingStep, err: impl std::fmt::Display) -> Self {
        Self {
            step,
            message: err.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("transfer failed after {attempts} attempt(s): {message}")]
    TransientTransfer { attempts: u32, message: String },

    #[error("source rejected item: {0}")]
    PermanentSource(String),

    #[error(transparent)]
    Processing(#[from] ProcessingError),

    #[error("state store error: {0}")]
    StateStore(String),

    #[error("illegal status transition for {identity}: {from} -> {to}")]
    InvalidTransition {
        identity: String,
        from: ItemStatus,
        to: ItemStatus,
    },

    #[error("incomplete outcome for {identity}: status {status} is missing required fields")]
    IncompleteOutcome { identity: String, status: ItemStatus },

    #[error("no record for item {0}")]
    UnknownItem(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("discovery failed: {0}")]
    Discovery(String),
}

impl SyncError {
    /// Whether this error must abort the whole run rather than one item.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SyncError::TransientTransfer { .. }
                | SyncError::PermanentSource(_)
                | SyncError::Processing(_)
        )
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::StateStore(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(SourceError::from_status(429, "slow down").is_transient());
        assert!(SourceError::from_status(503, "").is_transient());
        assert!(SourceError::from_status(408, "").is_transient());
        assert!(!SourceError::from_status(404, "gone").is_transient());
        assert!(!SourceError::from_status(403, "").is_transient());
    }

    #[test]
    fn io_not_found_is_permanent() {
        let err: SourceError = std::io::Error::from(std::io::ErrorKind::NotFound).into();
        assert!(!err.is_transient());
        let err: SourceError = std::io::Error::from(std::io::ErrorKind::TimedOut).into();
        assert!(err.is_transient());
    }

    #[test]
    fn item_errors_are_not_fatal() {
        assert!(!SyncError::PermanentSource("x".into()).is_fatal());
        assert!(!SyncError::TransientTransfer {
            attempts: 3,
            message: "x".into()
        }
        .is_fatal());
        assert!(!SyncError::Processing(ProcessingError::new(ProcessingStep::Embed, "x")).is_fatal());
        assert!(SyncError::StateStore("disk full".into()).is_fatal());
        assert!(SyncError::Config("bad".into()).is_fatal());
    }
}

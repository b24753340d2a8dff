//! Bounded-concurrency transfer into the staging area.
//!
//! Every remote download runs under a permit of one process-wide
//! [`Semaphore`], wrapped in a [`RetryPolicy`] that retries only transient
//! failures. The permit is released while backing off so a sleeping retry
//! never blocks another item's transfer.
//!
//! The stage performs no state-store writes: it returns one
//! [`TransferOutcome`] per input and the orchestrator records them from its
//! single processing sequence.

use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::config::{RetryConfig, SyncConfig};
use crate::error::{SourceError, SyncError};
use crate::models::{ItemDescriptor, Locator};
use crate::traits::RemoteSource;

/// Exponential backoff without jitter: `floor · 2^(n-1)`, capped at `ceiling`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub floor: Duration,
    pub ceiling: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            floor: config.floor(),
            ceiling: config.ceiling(),
        }
    }

    /// Delay to wait after failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.floor
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.ceiling)
            .min(self.ceiling)
    }
}

/// A document available on local disk for the duration of processing.
///
/// Files written by the transfer stage are removed when the guard is
/// dropped, on every exit path. Local originals are never touched.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    owned: bool,
}

impl StagedFile {
    /// A file created by the stage; removed on drop.
    pub fn owned(path: PathBuf) -> Self {
        Self { path, owned: true }
    }

    /// An original processed in place; left alone on drop.
    pub fn borrowed(path: PathBuf) -> Self {
        Self { path, owned: false }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.owned {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.path.display(), error = %e, "failed to remove staged file");
                }
            }
        }
    }
}

/// Result of one `fetch`, with the number of attempts actually made.
#[derive(Debug)]
pub struct TransferOutcome {
    pub result: Result<StagedFile, SyncError>,
    pub attempts: u32,
}

pub struct TransferStage {
    semaphore: Arc<Semaphore>,
    policy: RetryPolicy,
    staging_dir: PathBuf,
    remote: Option<Arc<dyn RemoteSource>>,
}

impl TransferStage {
    pub fn new(
        max_concurrent: usize,
        policy: RetryPolicy,
        staging_dir: PathBuf,
        remote: Option<Arc<dyn RemoteSource>>,
    ) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            policy,
            staging_dir,
            remote,
        }
    }

    pub fn from_config(config: &SyncConfig, remote: Option<Arc<dyn RemoteSource>>) -> Self {
        Self::new(
            config.max_concurrent_transfers,
            RetryPolicy::from_config(&config.retry),
            config.staging_dir.clone(),
            remote,
        )
    }

    /// Make `item` available locally.
    pub async fn fetch(&self, item: &ItemDescriptor) -> TransferOutcome {
        match &item.locator {
            Locator::Local(path) => {
                let result = match tokio::fs::metadata(path).await {
                    Ok(meta) if meta.is_file() => Ok(StagedFile::borrowed(path.clone())),
                    Ok(_) => Err(SyncError::PermanentSource(format!(
                        "{} is not a regular file",
                        path.display()
                    ))),
                    Err(e) => Err(SyncError::PermanentSource(format!(
                        "{}: {}",
                        path.display(),
                        e
                    ))),
                };
                TransferOutcome {
                    result,
                    attempts: 1,
                }
            }
            Locator::Remote {
                drive_id,
                item_id,
                download_url,
            } => {
                self.fetch_remote(item, drive_id, item_id, download_url.as_deref())
                    .await
            }
        }
    }

    async fn fetch_remote(
        &self,
        item: &ItemDescriptor,
        drive_id: &str,
        item_id: &str,
        download_url: Option<&str>,
    ) -> TransferOutcome {
        let Some(remote) = &self.remote else {
            return TransferOutcome {
                result: Err(SyncError::PermanentSource(
                    "no remote source configured for remote item".to_string(),
                )),
                attempts: 0,
            };
        };

        if let Err(e) = tokio::fs::create_dir_all(&self.staging_dir).await {
            return TransferOutcome {
                result: Err(SyncError::TransientTransfer {
                    attempts: 0,
                    message: format!("cannot create staging dir: {}", e),
                }),
                attempts: 0,
            };
        }
        let dest = self.staging_dir.join(staged_file_name(item));

        let mut attempt = 0;
        loop {
            attempt += 1;

            let result = match self.semaphore.acquire().await {
                Ok(_permit) => remote.download(drive_id, item_id, download_url, &dest).await,
                Err(_) => Err(SourceError::Permanent("transfer stage shut down".to_string())),
            };

            match result {
                Ok(()) => {
                    tracing::debug!(identity = %item.identity, attempt, "transfer complete");
                    return TransferOutcome {
                        result: Ok(StagedFile::owned(dest)),
                        attempts: attempt,
                    };
                }
                Err(SourceError::Permanent(message)) => {
                    tracing::warn!(identity = %item.identity, %message, "permanent transfer failure");
                    return TransferOutcome {
                        result: Err(SyncError::PermanentSource(message)),
                        attempts: attempt,
                    };
                }
                Err(SourceError::Transient(message)) => {
                    if attempt >= self.policy.max_attempts {
                        tracing::warn!(identity = %item.identity, attempts = attempt, %message, "transfer retries exhausted");
                        return TransferOutcome {
                            result: Err(SyncError::TransientTransfer {
                                attempts: attempt,
                                message,
                            }),
                            attempts: attempt,
                        };
                    }
                    let delay = self.policy.delay_for(attempt);
                    tracing::info!(
                        identity = %item.identity,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %message,
                        "transient transfer failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Launch every item at once and collect one outcome per input, in input order.
    ///
    /// A failure of one item never cancels or hides the result of another.
    pub async fn fetch_batch(&self, items: &[ItemDescriptor]) -> Vec<TransferOutcome> {
        join_all(items.iter().map(|item| self.fetch(item))).await
    }
}

/// `<identity>.<ext>`, with characters unsafe in file names replaced.
fn staged_file_name(item: &ItemDescriptor) -> String {
    let stem: String = item
        .identity
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    match item.extension() {
        Some(ext) => format!("{}.{}", stem, ext),
        None => stem,
    }
}

//! Sync orchestration.
//!
//! Drives one run end to end:
//!
//! ```text
//! discover (full) ──▶ plan_work ──▶ batches of batch_size
//!                                     │
//!                                     ├─ transfer: all items concurrently, bounded by the semaphore
//!                                     ├─ record transfer outcomes (single writer)
//!                                     └─ process: staged items one at a time, in batch order
//! ```
//!
//! Batch N+1 never starts before batch N's processing has drained, which
//! bounds staging disk usage and keeps single-instance collaborators safe.

use anyhow::{bail, Context};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::config::Config;
use crate::connector_fs::FilesystemConnector;
use crate::connector_remote::{GraphDriveSource, RemoteConnector};
use crate::embedding::create_provider;
use crate::error::{Result, SyncError};
use crate::extract::DocumentExtractor;
use crate::filter::plan_work;
use crate::index::SqliteIndex;
use crate::models::{ItemDescriptor, ItemStatus, LogEvent, RunSummary};
use crate::processing::{ItemResult, ProcessingStage};
use crate::progress::{NoProgress, ProgressMode, SyncProgressEvent, SyncProgressReporter};
use crate::render::create_renderer;
use crate::state::{StateStore, TransitionFields};
use crate::traits::{Connector, RemoteSource, VectorIndex};
use crate::transfer::{StagedFile, TransferStage};

/// Cooperative interruption shared between the CLI signal handler and a run.
///
/// Checked before each batch and before each item's processing; in-flight
/// work always finishes first.
#[derive(Clone, Default, Debug)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct BatchOrchestrator {
    store: StateStore,
    transfer: TransferStage,
    processing: ProcessingStage,
    batch_size: usize,
    progress: Box<dyn SyncProgressReporter>,
    cancel: CancellationFlag,
}

#[derive(Default)]
struct Counters {
    processed: u64,
    failed: u64,
    done: u64,
}

impl BatchOrchestrator {
    pub fn new(
        store: StateStore,
        transfer: TransferStage,
        processing: ProcessingStage,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            transfer,
            processing,
            batch_size: batch_size.max(1),
            progress: Box::new(NoProgress),
            cancel: CancellationFlag::new(),
        }
    }

    pub fn with_progress(mut self, progress: Box<dyn SyncProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run one sync over `connector`.
    ///
    /// Per-item failures are recorded and counted; only state-store and
    /// discovery failures abort the run.
    pub async fn run(&self, connector: &dyn Connector, incremental: bool) -> Result<RunSummary> {
        let started = Instant::now();
        let label = connector.source_label();
        let run_id = Uuid::new_v4().to_string();
        tracing::info!(%run_id, connector = %label, incremental, "sync started");

        self.progress.report(SyncProgressEvent::Discovering {
            connector: label.clone(),
        });
        let descriptors = connector
            .discover()
            .await
            .map_err(|e| SyncError::Discovery(format!("{:#}", e)))?;

        let plan = plan_work(&self.store, descriptors, incremental).await?;
        self.progress.report(SyncProgressEvent::Planned {
            connector: label.clone(),
            discovered: plan.discovered,
            queued: plan.queue.len() as u64,
            skipped: plan.skipped,
        });

        if plan.queue.is_empty() {
            tracing::info!(%run_id, connector = %label, "nothing to process");
            return Ok(RunSummary {
                run_id,
                discovered: plan.discovered,
                skipped: plan.skipped,
                processed: 0,
                failed: 0,
                duration_secs: 0.0,
                interrupted: false,
                statistics: self.store.statistics().await?,
            });
        }

        let total = plan.queue.len() as u64;
        let batches = plan.queue.len().div_ceil(self.batch_size) as u64;
        let mut counters = Counters::default();
        let mut interrupted = false;

        for (batch_no, batch) in plan.queue.chunks(self.batch_size).enumerate() {
            if self.cancel.is_cancelled() {
                interrupted = true;
                break;
            }
            self.progress.report(SyncProgressEvent::Batch {
                connector: label.clone(),
                batch: batch_no as u64 + 1,
                batches,
                items: batch.len() as u64,
            });
            tracing::info!(%run_id, connector = %label, batch = batch_no + 1, batches, items = batch.len(), "batch started");

            let staged = self.transfer_batch(batch, &label, total, &mut counters).await?;
            if self.process_batch(staged, &label, total, &mut counters).await? {
                interrupted = true;
                break;
            }
        }

        if interrupted {
            tracing::warn!(%run_id, connector = %label, "run interrupted; remaining items stay pending");
        }
        tracing::info!(
            %run_id,
            processed = counters.processed,
            failed = counters.failed,
            "sync finished"
        );

        Ok(RunSummary {
            run_id,
            discovered: plan.discovered,
            skipped: plan.skipped,
            processed: counters.processed,
            failed: counters.failed,
            duration_secs: started.elapsed().as_secs_f64(),
            interrupted,
            statistics: self.store.statistics().await?,
        })
    }

    /// Transfer a batch and record each outcome. Returns the staged items in batch order.
    async fn transfer_batch<'a>(
        &self,
        batch: &'a [ItemDescriptor],
        label: &str,
        total: u64,
        counters: &mut Counters,
    ) -> Result<Vec<(&'a ItemDescriptor, StagedFile)>> {
        let outcomes = self.transfer.fetch_batch(batch).await;

        let mut staged = Vec::with_capacity(batch.len());
        for (item, outcome) in batch.iter().zip(outcomes) {
            match outcome.result {
                Ok(file) => {
                    let message = if file.is_owned() {
                        format!(
                            "staged {} after {} attempt(s)",
                            file.path().display(),
                            outcome.attempts
                        )
                    } else {
                        format!("using local file {}", file.path().display())
                    };
                    self.store
                        .append_log(&item.identity, LogEvent::Transfer, &message)
                        .await?;
                    staged.push((item, file));
                }
                Err(err) if !err.is_fatal() => {
                    let message = err.to_string();
                    self.store
                        .transition(
                            &item.identity,
                            ItemStatus::Failed,
                            TransitionFields::failed(message.clone()),
                        )
                        .await?;
                    self.store
                        .append_log(&item.identity, LogEvent::Transfer, &message)
                        .await?;
                    counters.failed += 1;
                    counters.done += 1;
                    self.progress.report(SyncProgressEvent::Item {
                        connector: label.to_string(),
                        n: counters.done,
                        total,
                        name: item.display_name.clone(),
                        ok: false,
                    });
                }
                Err(fatal) => return Err(fatal),
            }
        }
        Ok(staged)
    }

    /// Process staged items sequentially. Returns true when interrupted.
    async fn process_batch(
        &self,
        staged: Vec<(&ItemDescriptor, StagedFile)>,
        label: &str,
        total: u64,
        counters: &mut Counters,
    ) -> Result<bool> {
        for (item, file) in staged {
            if self.cancel.is_cancelled() {
                // Dropping the remaining guards cleans their staging files.
                return Ok(true);
            }

            let result = self.processing.process(&file, item).await?;
            drop(file);

            let ok = result.is_success();
            match result {
                ItemResult::Success(_) => counters.processed += 1,
                ItemResult::Failed(_) => counters.failed += 1,
            }
            counters.done += 1;
            self.progress.report(SyncProgressEvent::Item {
                connector: label.to_string(),
                n: counters.done,
                total,
                name: item.display_name.clone(),
                ok,
            });
        }
        Ok(false)
    }
}

/// Build every collaborator from `config` and run one sync over `connector_name`.
pub async fn run_sync(
    config: &Config,
    connector_name: &str,
    full: bool,
    progress: ProgressMode,
    cancel: CancellationFlag,
) -> anyhow::Result<RunSummary> {
    let (connector, remote): (Box<dyn Connector>, Option<Arc<dyn RemoteSource>>) =
        match connector_name {
            "filesystem" => {
                let fs_config = config
                    .connectors
                    .filesystem
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("Filesystem connector not configured"))?;
                let connector: Box<dyn Connector> =
                    Box::new(FilesystemConnector::new("filesystem", fs_config)?);
                (connector, None)
            }
            "remote" => {
                let remote_config = config
                    .connectors
                    .remote
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("Remote connector not configured"))?;
                let source: Arc<dyn RemoteSource> =
                    Arc::new(GraphDriveSource::from_config(remote_config)?);
                let connector: Box<dyn Connector> = Box::new(RemoteConnector::new(
                    "remote",
                    Arc::clone(&source),
                    remote_config.roots.clone(),
                    &remote_config.extensions,
                    remote_config.max_depth,
                ));
                (connector, Some(source))
            }
            other => bail!(
                "Unknown connector: '{}'. Available: filesystem, remote",
                other
            ),
        };

    let store = StateStore::open(&config.db.path)
        .await
        .context("Failed to open state store")?;
    let index = Arc::new(SqliteIndex::open(&config.index.path).await?);

    let processing = ProcessingStage::new(
        store.clone(),
        Arc::new(DocumentExtractor),
        create_renderer(&config.render)?,
        create_provider(&config.embedding)?,
        Arc::clone(&index) as Arc<dyn VectorIndex>,
        config.sync.render_dir.clone(),
    );
    let transfer = TransferStage::from_config(&config.sync, remote);

    let orchestrator = BatchOrchestrator::new(store.clone(), transfer, processing, config.sync.batch_size)
        .with_progress(progress.reporter())
        .with_cancellation(cancel);

    let result = orchestrator.run(connector.as_ref(), !full).await;

    index.close().await;
    store.close().await;
    Ok(result?)
}

/// Print a run summary to stdout.
pub fn print_summary(label: &str, summary: &RunSummary) {
    let counts = &summary.statistics.counts_by_status;
    println!("sync {} (run {})", label, summary.run_id);
    println!("  discovered: {}", summary.discovered);
    println!("  skipped:    {}", summary.skipped);
    println!("  processed:  {}", summary.processed);
    println!("  failed:     {}", summary.failed);
    println!("  duration:   {:.2}s", summary.duration_secs);
    if summary.interrupted {
        println!("  interrupted: remaining items left pending");
    }
    println!(
        "  state:      {} success, {} failed, {} pending, {} processing",
        counts.success, counts.failed, counts.pending, counts.processing
    );
    println!("{}", summary_verdict(summary));
}

fn summary_verdict(summary: &RunSummary) -> &'static str {
    if summary.is_success() {
        "ok"
    } else if summary.interrupted {
        "interrupted"
    } else {
        "completed with failures"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_shared_between_clones() {
        let flag = CancellationFlag::new();
        let other = flag.clone();
        assert!(!other.is_cancelled());
        flag.cancel();
        assert!(other.is_cancelled());
    }

    fn summary(failed: u64, interrupted: bool) -> RunSummary {
        RunSummary {
            run_id: "run".to_string(),
            discovered: 3,
            skipped: 0,
            processed: 3 - failed,
            failed,
            duration_secs: 0.5,
            interrupted,
            statistics: Default::default(),
        }
    }

    #[test]
    fn verdict_reports_failures_and_interruption() {
        assert_eq!(summary_verdict(&summary(0, false)), "ok");
        assert_eq!(summary_verdict(&summary(1, false)), "completed with failures");
        assert_eq!(summary_verdict(&summary(0, true)), "interrupted");
    }
}

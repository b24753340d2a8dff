//! Work-list planning.
//!
//! Turns one full discovery pass into the ordered list of items to process
//! this run, registering each accepted item as `pending` before any transfer
//! starts. Items that are not accepted are not written to at all.

use std::collections::HashSet;

use crate::error::Result;
use crate::models::ItemDescriptor;
use crate::state::StateStore;

/// Items selected for this run plus the counters reported in the summary.
#[derive(Debug, Default)]
pub struct WorkPlan {
    pub queue: Vec<ItemDescriptor>,
    pub discovered: u64,
    pub skipped: u64,
}

/// Apply change detection to `descriptors`.
///
/// With `incremental = false` every discovered item is queued. Otherwise an
/// item is queued when [`StateStore::should_process`] says so, which always
/// includes items that failed in a previous run. Duplicate identities are
/// collapsed; the first occurrence wins.
pub async fn plan_work(
    store: &StateStore,
    descriptors: Vec<ItemDescriptor>,
    incremental: bool,
) -> Result<WorkPlan> {
    let mut plan = WorkPlan {
        discovered: descriptors.len() as u64,
        ..Default::default()
    };
    let mut seen: HashSet<String> = HashSet::with_capacity(descriptors.len());

    for item in descriptors {
        if !seen.insert(item.identity.clone()) {
            tracing::warn!(identity = %item.identity, locator = %item.source_locator, "duplicate identity in discovery, ignoring");
            plan.skipped += 1;
            continue;
        }

        let wanted = !incremental
            || store
                .should_process(&item.identity, &item.fingerprint, item.modified)
                .await?;
        if !wanted {
            plan.skipped += 1;
            continue;
        }

        store.register_pending(&item).await?;
        plan.queue.push(item);
    }

    tracing::info!(
        discovered = plan.discovered,
        queued = plan.queue.len(),
        skipped = plan.skipped,
        incremental,
        "work list planned"
    );
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ItemStatus, Locator, ResultMetrics};
    use crate::state::TransitionFields;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn item(id: &str, fingerprint: &str) -> ItemDescriptor {
        ItemDescriptor {
            identity: id.to_string(),
            source_locator: format!("/docs/{}.pptx", id),
            display_name: format!("{}.pptx", id),
            modified: Utc.timestamp_opt(1_000, 0).unwrap(),
            size: 1,
            fingerprint: fingerprint.to_string(),
            locator: Locator::Local(format!("/docs/{}.pptx", id).into()),
        }
    }

    async fn mark_success(store: &StateStore, id: &str) {
        store
            .transition(id, ItemStatus::Processing, TransitionFields::default())
            .await
            .unwrap();
        store
            .transition(
                id,
                ItemStatus::Success,
                TransitionFields::success(
                    "derived",
                    ResultMetrics {
                        unit_count: 1,
                        duration_secs: 0.1,
                    },
                ),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn incremental_skips_unchanged_success() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::open(&tmp.path().join("s.sqlite")).await.unwrap();

        let first = plan_work(&store, vec![item("a", "1"), item("b", "1")], true)
            .await
            .unwrap();
        assert_eq!(first.queue.len(), 2);
        mark_success(&store, "a").await;
        mark_success(&store, "b").await;

        let second = plan_work(&store, vec![item("a", "1"), item("b", "2")], true)
            .await
            .unwrap();
        let ids: Vec<_> = second.queue.iter().map(|i| i.identity.as_str()).collect();
        assert_eq!(ids, vec!["b"]);
        assert_eq!(second.discovered, 2);
        assert_eq!(second.skipped, 1);

        let untouched = store.get("a").await.unwrap().unwrap();
        assert_eq!(untouched.status, ItemStatus::Success);
    }

    #[tokio::test]
    async fn full_run_queues_everything() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::open(&tmp.path().join("s.sqlite")).await.unwrap();
        plan_work(&store, vec![item("a", "1")], true).await.unwrap();
        mark_success(&store, "a").await;

        let plan = plan_work(&store, vec![item("a", "1")], false).await.unwrap();
        assert_eq!(plan.queue.len(), 1);
        assert_eq!(
            store.get("a").await.unwrap().unwrap().status,
            ItemStatus::Pending
        );
    }

    #[tokio::test]
    async fn duplicate_identities_are_collapsed() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::open(&tmp.path().join("s.sqlite")).await.unwrap();
        let plan = plan_work(&store, vec![item("a", "1"), item("a", "2")], true)
            .await
            .unwrap();
        assert_eq!(plan.queue.len(), 1);
        assert_eq!(plan.queue[0].fingerprint, "1");
        assert_eq!(plan.skipped, 1);
    }
}

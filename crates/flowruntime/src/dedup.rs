//! Per-flow deduplication ledger.
//!
//! Each flow keeps a versioned `last_internal_id` cursor plus the set of item
//! ids whose chains already terminated. A cycle reads a [`DedupSnapshot`] at
//! start, filters trigger output against it and, once every chain is done,
//! advances the cursor with a compare-and-set on the snapshot's version.

use crate::store::DedupStore;
use flowcore::{FlowId, FlowScope, InternalId, StoreError, TriggerItem};
use std::collections::HashSet;
use std::sync::Arc;

/// Dedup state of one flow as read at cycle start
#[derive(Debug, Clone)]
pub struct DedupSnapshot {
    pub flow_id: FlowId,
    pub last_internal_id: Option<InternalId>,
    pub version: u64,
    processed: Arc<HashSet<InternalId>>,
}

impl DedupSnapshot {
    /// Snapshot that lets every item through; used by test runs
    pub fn empty(flow_id: FlowId) -> Self {
        Self {
            flow_id,
            last_internal_id: None,
            version: 0,
            processed: Arc::new(HashSet::new()),
        }
    }

    pub fn is_already_processed(&self, internal_id: &InternalId) -> bool {
        self.processed.contains(internal_id)
    }

    pub fn scope(&self) -> FlowScope {
        FlowScope::new(
            self.flow_id,
            self.last_internal_id.clone(),
            self.processed.clone(),
        )
    }
}

/// Items left after filtering, oldest first
#[derive(Debug)]
pub struct Filtered {
    pub fresh: Vec<TriggerItem>,
    pub skipped: usize,
    /// Greatest id above the cursor, including items already processed
    pub newest: Option<InternalId>,
}

pub struct DedupLedger {
    store: Arc<dyn DedupStore>,
}

impl DedupLedger {
    pub fn new(store: Arc<dyn DedupStore>) -> Self {
        Self { store }
    }

    pub async fn snapshot(&self, flow_id: FlowId) -> Result<DedupSnapshot, StoreError> {
        let state = self.store.dedup_state(flow_id).await?;
        let processed = self.store.processed_ids(flow_id).await?;
        Ok(DedupSnapshot {
            flow_id,
            last_internal_id: state.last_internal_id,
            version: state.version,
            processed: Arc::new(processed),
        })
    }

    /// Drop items at or below the cursor, then items already processed.
    /// Input order is kept.
    pub fn filter(&self, snapshot: &DedupSnapshot, items: Vec<TriggerItem>) -> Filtered {
        let total = items.len();
        let above_cursor: Vec<TriggerItem> = items
            .into_iter()
            .filter(|item| match &snapshot.last_internal_id {
                Some(last) => item.internal_id() > last,
                None => true,
            })
            .collect();
        let newest = above_cursor.iter().map(|item| item.internal_id()).max().cloned();
        let fresh: Vec<TriggerItem> = above_cursor
            .into_iter()
            .filter(|item| !snapshot.is_already_processed(item.internal_id()))
            .collect();
        let skipped = total - fresh.len();
        if skipped > 0 {
            tracing::debug!(flow_id = %snapshot.flow_id, skipped, "skipped already seen items");
        }
        Filtered {
            fresh,
            skipped,
            newest,
        }
    }

    pub async fn record_processed(
        &self,
        flow_id: FlowId,
        internal_id: &InternalId,
    ) -> Result<(), StoreError> {
        self.store.record_processed(flow_id, internal_id).await
    }

    /// Move the cursor to `candidate` if it is newer than the snapshot's.
    ///
    /// Returns `Ok(false)` when there was nothing to advance. Fails with
    /// `StaleDedupState` if another cycle advanced the cursor since the
    /// snapshot was taken.
    pub async fn advance(
        &self,
        snapshot: &DedupSnapshot,
        candidate: &InternalId,
    ) -> Result<bool, StoreError> {
        if let Some(last) = &snapshot.last_internal_id {
            if candidate <= last {
                return Ok(false);
            }
        }
        let state = self
            .store
            .compare_and_set_last_internal_id(snapshot.flow_id, snapshot.version, candidate.clone())
            .await?;
        tracing::info!(
            flow_id = %snapshot.flow_id,
            last_internal_id = %candidate,
            version = state.version,
            "advanced dedup cursor"
        );
        // The cursor already moved; a failed prune only leaves extra ids behind
        if let Err(e) = self.store.prune_processed(snapshot.flow_id, candidate).await {
            tracing::warn!(flow_id = %snapshot.flow_id, error = %e, "failed to prune processed ids");
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use flowcore::JsonObject;
    use uuid::Uuid;

    fn items(ids: &[&str]) -> Vec<TriggerItem> {
        ids.iter().map(|id| TriggerItem::new(*id, JsonObject::new())).collect()
    }

    fn ids(items: &[TriggerItem]) -> Vec<String> {
        items.iter().map(|i| i.internal_id().to_string()).collect()
    }

    #[tokio::test]
    async fn test_cutoff_then_membership() {
        let store = Arc::new(MemoryStore::new());
        let flow_id = Uuid::new_v4();
        store.compare_and_set_last_internal_id(flow_id, 0, "5".into()).await.unwrap();
        store.record_processed(flow_id, &"7".into()).await.unwrap();

        let ledger = DedupLedger::new(store);
        let snapshot = ledger.snapshot(flow_id).await.unwrap();
        let filtered = ledger.filter(&snapshot, items(&["4", "5", "6", "7", "10"]));

        assert_eq!(ids(&filtered.fresh), vec!["6", "10"]);
        assert_eq!(filtered.skipped, 3);
        assert_eq!(filtered.newest, Some(InternalId::from("10")));
    }

    #[tokio::test]
    async fn test_newest_counts_processed_items_above_cursor() {
        let store = Arc::new(MemoryStore::new());
        let flow_id = Uuid::new_v4();
        store.record_processed(flow_id, &"8".into()).await.unwrap();

        let ledger = DedupLedger::new(store);
        let snapshot = ledger.snapshot(flow_id).await.unwrap();
        let filtered = ledger.filter(&snapshot, items(&["8"]));

        assert!(filtered.fresh.is_empty());
        assert_eq!(filtered.newest, Some(InternalId::from("8")));
    }

    #[tokio::test]
    async fn test_empty_snapshot_keeps_everything() {
        let ledger = DedupLedger::new(Arc::new(MemoryStore::new()));
        let snapshot = DedupSnapshot::empty(Uuid::new_v4());
        let filtered = ledger.filter(&snapshot, items(&["1", "2"]));
        assert_eq!(filtered.fresh.len(), 2);
        assert!(snapshot.scope().last_internal_id.is_none());
    }

    #[tokio::test]
    async fn test_advance_only_moves_forward() {
        let store = Arc::new(MemoryStore::new());
        let flow_id = Uuid::new_v4();
        let ledger = DedupLedger::new(store.clone());

        let snapshot = ledger.snapshot(flow_id).await.unwrap();
        assert!(ledger.advance(&snapshot, &"9".into()).await.unwrap());

        let snapshot = ledger.snapshot(flow_id).await.unwrap();
        assert!(!ledger.advance(&snapshot, &"3".into()).await.unwrap());
        assert_eq!(snapshot.last_internal_id, Some(InternalId::from("9")));
    }

    #[tokio::test]
    async fn test_advance_prunes_ids_behind_the_cursor() {
        let store = Arc::new(MemoryStore::new());
        let flow_id = Uuid::new_v4();
        for id in ["3", "6", "9", "12"] {
            store.record_processed(flow_id, &id.into()).await.unwrap();
        }
        let ledger = DedupLedger::new(store.clone());

        let snapshot = ledger.snapshot(flow_id).await.unwrap();
        assert!(ledger.advance(&snapshot, &"9".into()).await.unwrap());

        let remaining = store.processed_ids(flow_id).await.unwrap();
        assert_eq!(remaining, HashSet::from([InternalId::from("12")]));

        let snapshot = ledger.snapshot(flow_id).await.unwrap();
        let filtered = ledger.filter(&snapshot, items(&["6", "9", "12", "13"]));
        assert_eq!(ids(&filtered.fresh), vec!["13"]);
        assert!(snapshot.scope().is_already_processed("6"));
    }

    #[tokio::test]
    async fn test_concurrent_advance_from_same_base_is_stale() {
        let store = Arc::new(MemoryStore::new());
        let flow_id = Uuid::new_v4();
        let ledger = DedupLedger::new(store);

        let first = ledger.snapshot(flow_id).await.unwrap();
        let second = ledger.snapshot(flow_id).await.unwrap();

        ledger.advance(&first, &"4".into()).await.unwrap();
        let err = ledger.advance(&second, &"6".into()).await.unwrap_err();
        assert!(matches!(err, StoreError::StaleDedupState { .. }));
    }
}

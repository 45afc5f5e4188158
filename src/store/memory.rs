//! In-memory snapshot store (tests and single-instance runs).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{SnapshotStore, StoreResult};
use crate::model::{BillingSnapshot, SnapshotKey};

#[derive(Debug, Default, Clone)]
pub struct MemorySnapshotStore {
    snapshots: Arc<RwLock<BTreeMap<SnapshotKey, BillingSnapshot>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.snapshots.read().await.len()
    }

    pub async fn clear(&self) {
        self.snapshots.write().await.clear();
    }

    /// Every stored snapshot in key order.
    pub async fn all(&self) -> Vec<BillingSnapshot> {
        self.snapshots.read().await.values().cloned().collect()
    }
}

#[async_trait::async_trait]
impl SnapshotStore for MemorySnapshotStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upsert(&self, snapshot: &BillingSnapshot) -> StoreResult<()> {
        let mut snapshots = self.snapshots.write().await;
        snapshots.insert(snapshot.key(), snapshot.clone());
        Ok(())
    }

    async fn list_available_periods(&self, user_id: &str) -> StoreResult<Vec<DateTime<Utc>>> {
        let snapshots = self.snapshots.read().await;
        let periods: BTreeSet<DateTime<Utc>> = snapshots
            .keys()
            .filter(|k| k.user_id == user_id)
            .map(|k| k.from)
            .collect();
        Ok(periods.into_iter().rev().collect())
    }

    async fn get_snapshots(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
    ) -> StoreResult<Vec<BillingSnapshot>> {
        let snapshots = self.snapshots.read().await;
        let mut matching: Vec<BillingSnapshot> = snapshots
            .iter()
            .filter(|(k, _)| k.user_id == user_id && k.from == from)
            .map(|(_, v)| v.clone())
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }

    async fn remove(&self, key: &SnapshotKey) -> StoreResult<bool> {
        let mut snapshots = self.snapshots.write().await;
        Ok(snapshots.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CostEntry, CostNode, CostTree, TreeKey, Window};
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 0, 0, 0).unwrap()
    }

    fn tree(cpu: f64) -> CostTree {
        let mut tree = CostTree::new();
        tree.insert(
            TreeKey::Namespace("ns1".into()),
            CostNode::leaf(CostEntry::new(cpu, 0.0, 0.0)),
        );
        tree
    }

    fn snapshot(user: &str, month: u32, created: u32, cpu: f64) -> BillingSnapshot {
        BillingSnapshot::new(user, Window::month(2024, month).unwrap(), at(created), tree(cpu))
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = MemorySnapshotStore::new();

        store.upsert(&snapshot("u1", 1, 1, 1.0)).await.unwrap();
        store.upsert(&snapshot("u1", 1, 1, 2.0)).await.unwrap();

        assert_eq!(store.count().await, 1);
        let from = Window::month(2024, 1).unwrap().from;
        let stored = store.get_snapshots("u1", from).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].tree.namespace("ns1").unwrap().month.cpu, 2.0);
    }

    #[tokio::test]
    async fn test_periods_distinct_and_descending() {
        let store = MemorySnapshotStore::new();
        store.upsert(&snapshot("u1", 1, 1, 1.0)).await.unwrap();
        store.upsert(&snapshot("u1", 1, 2, 1.0)).await.unwrap();
        store.upsert(&snapshot("u1", 2, 1, 1.0)).await.unwrap();
        store.upsert(&snapshot("u2", 3, 1, 1.0)).await.unwrap();

        let periods = store.list_available_periods("u1").await.unwrap();
        assert_eq!(
            periods,
            vec![
                Window::month(2024, 2).unwrap().from,
                Window::month(2024, 1).unwrap().from
            ]
        );
        assert!(store.list_available_periods("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshots_newest_first() {
        let store = MemorySnapshotStore::new();
        store.upsert(&snapshot("u1", 1, 1, 1.0)).await.unwrap();
        store.upsert(&snapshot("u1", 1, 5, 5.0)).await.unwrap();
        store.upsert(&snapshot("u1", 1, 3, 3.0)).await.unwrap();

        let from = Window::month(2024, 1).unwrap().from;
        let stored = store.get_snapshots("u1", from).await.unwrap();
        let created: Vec<_> = stored.iter().map(|s| s.created_at).collect();
        assert_eq!(created, vec![at(5), at(3), at(1)]);
    }

    #[tokio::test]
    async fn test_remove_single_run() {
        let store = MemorySnapshotStore::new();
        let first = snapshot("u1", 1, 1, 1.0);
        store.upsert(&first).await.unwrap();
        store.upsert(&snapshot("u1", 1, 2, 1.0)).await.unwrap();

        assert!(store.remove(&first.key()).await.unwrap());
        assert!(!store.remove(&first.key()).await.unwrap());

        let from = Window::month(2024, 1).unwrap().from;
        let remaining = store.get_snapshots("u1", from).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].created_at, at(2));
    }
}

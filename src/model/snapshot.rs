//! Persisted billing snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::cost::CostTree;
use super::window::Window;

/// One computation result for one user and one period. Never mutated after creation.
///
/// Serialized field names match [`crate::store::fields`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingSnapshot {
    pub user_id: String,
    #[serde(rename = "period_from")]
    pub from: DateTime<Utc>,
    #[serde(rename = "period_to")]
    pub to: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub tree: CostTree,
}

impl BillingSnapshot {
    pub fn new(
        user_id: impl Into<String>,
        window: Window,
        created_at: DateTime<Utc>,
        tree: CostTree,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            from: window.from,
            to: window.to,
            created_at,
            tree,
        }
    }

    /// Identity of the snapshot: `(user_id, from, created_at)`.
    pub fn key(&self) -> SnapshotKey {
        SnapshotKey {
            user_id: self.user_id.clone(),
            from: self.from,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SnapshotKey {
    pub user_id: String,
    pub from: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

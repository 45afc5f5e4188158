//! Persisted field and index names of a [`BillingSnapshot`](crate::model::BillingSnapshot).

pub const USER_ID: &str = "user_id";
pub const PERIOD_FROM: &str = "period_from";
pub const PERIOD_TO: &str = "period_to";
pub const CREATED_AT: &str = "created_at";
pub const TREE: &str = "tree";

/// Latest-snapshot lookup. Not unique: a period holds one snapshot per run.
pub const USER_FROM_INDEX: &str = "user_from_idx";
pub const USER_FROM_INDEX_FIELDS: [&str; 2] = [USER_ID, PERIOD_FROM];

/// Identity of a snapshot.
pub const USER_FROM_CREATED_AT_INDEX: &str = "user_from_created_at_idx";
pub const USER_FROM_CREATED_AT_INDEX_FIELDS: [&str; 3] = [USER_ID, PERIOD_FROM, CREATED_AT];

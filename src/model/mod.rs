//! Cost data model: entries, trees, composite keys, windows and snapshots.

mod cost;
mod key;
mod snapshot;
mod window;

pub use cost::{
    CostEntry, CostNode, CostTree, MARSHALLING, PROCESS_IO, RESERVED_PROCESS_CHILDREN,
    SyntheticBranch, TreeKey, UserCostTree, finite_or_zero,
};
pub use key::{CompositeKey, Granularity, KEY_DELIMITER, KeyError};
pub use snapshot::{BillingSnapshot, SnapshotKey};
pub use window::{MAX_TRAILING_MONTHS, Window, first_of_month};

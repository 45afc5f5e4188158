//! Cost aggregation: joins the three allocation granularities into per-user
//! trees and adds the account-wide process branch.

mod builder;
mod process;

pub use builder::{CostTreeBuilder, DEFAULT_FETCH_TIMEOUT};
pub use process::ProcessCostDecomposer;

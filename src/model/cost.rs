//! Cost entries and the recursive cost tree.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::allocation::AllocationEntry;

/// Name of the marshalling share under the process root.
pub const MARSHALLING: &str = "marshalling";
/// Name of the process I/O share under the process root.
pub const PROCESS_IO: &str = "process-io";

/// Child names reserved under the process root.
pub const RESERVED_PROCESS_CHILDREN: [&str; 2] = [MARSHALLING, PROCESS_IO];

/// Replaces NaN and infinities with `0`. Undefined inputs carry no
/// attributable cost, and only finite costs survive a JSON round trip.
#[inline]
pub fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

/// An attributed monetary value split by resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostEntry {
    pub cpu: f64,
    pub ram: f64,
    pub storage: f64,
    /// Raw allocation this entry was derived from. Informational only.
    #[serde(skip)]
    pub source: Option<AllocationEntry>,
}

impl CostEntry {
    pub fn new(cpu: f64, ram: f64, storage: f64) -> Self {
        Self {
            cpu,
            ram,
            storage,
            source: None,
        }
    }

    /// Entry taken verbatim from an allocation, keeping the allocation as annotation.
    pub fn from_allocation(entry: &AllocationEntry) -> Self {
        Self {
            cpu: finite_or_zero(entry.cpu_cost),
            ram: finite_or_zero(entry.ram_cost),
            storage: finite_or_zero(entry.pv_cost),
            source: Some(entry.clone()),
        }
    }

    /// Multiplies every resource by `factor`. The annotation is not carried over.
    pub fn scale(&self, factor: f64) -> Self {
        Self::new(self.cpu * factor, self.ram * factor, self.storage * factor)
    }

    pub fn add(&mut self, other: &CostEntry) {
        self.cpu += other.cpu;
        self.ram += other.ram;
        self.storage += other.storage;
    }

    pub fn total(&self) -> f64 {
        self.cpu + self.ram + self.storage
    }

    pub fn is_zero(&self) -> bool {
        self.cpu == 0.0 && self.ram == 0.0 && self.storage == 0.0
    }
}

/// One node of a cost tree. A node's `month` is reported on its own and is
/// not derived from its children unless the node is a synthetic sum.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostNode {
    pub month: CostEntry,
    #[serde(default)]
    pub children: BTreeMap<String, CostNode>,
}

impl CostNode {
    pub fn leaf(month: CostEntry) -> Self {
        Self {
            month,
            children: BTreeMap::new(),
        }
    }

    pub fn with_children(month: CostEntry, children: BTreeMap<String, CostNode>) -> Self {
        Self { month, children }
    }

    pub fn child(&self, name: &str) -> Option<&CostNode> {
        self.children.get(name)
    }

    /// Sum of the direct children's `month` entries.
    pub fn children_total(&self) -> CostEntry {
        self.children
            .values()
            .fold(CostEntry::default(), |mut acc, child| {
                acc.add(&child.month);
                acc
            })
    }
}

/// Account-wide branches that are not namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyntheticBranch {
    Process,
}

impl SyntheticBranch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Process => "process",
        }
    }
}

impl std::fmt::Display for SyntheticBranch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level entry of a user's tree.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TreeKey {
    Namespace(String),
    Synthetic(SyntheticBranch),
}

/// Cost tree of one user. Namespaces and synthetic branches are kept in
/// disjoint maps so a namespace called `process` never shadows the process branch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostTree {
    #[serde(default)]
    pub namespaces: BTreeMap<String, CostNode>,
    #[serde(default)]
    pub synthetic: BTreeMap<SyntheticBranch, CostNode>,
}

impl CostTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: TreeKey, node: CostNode) -> Option<CostNode> {
        match key {
            TreeKey::Namespace(name) => self.namespaces.insert(name, node),
            TreeKey::Synthetic(branch) => self.synthetic.insert(branch, node),
        }
    }

    pub fn get(&self, key: &TreeKey) -> Option<&CostNode> {
        match key {
            TreeKey::Namespace(name) => self.namespaces.get(name),
            TreeKey::Synthetic(branch) => self.synthetic.get(branch),
        }
    }

    pub fn namespace(&self, name: &str) -> Option<&CostNode> {
        self.namespaces.get(name)
    }

    pub fn process(&self) -> Option<&CostNode> {
        self.synthetic.get(&SyntheticBranch::Process)
    }

    pub fn len(&self) -> usize {
        self.namespaces.len() + self.synthetic.len()
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty() && self.synthetic.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = TreeKey> + '_ {
        self.namespaces
            .keys()
            .cloned()
            .map(TreeKey::Namespace)
            .chain(self.synthetic.keys().copied().map(TreeKey::Synthetic))
    }
}

/// Per-user trees of one window. Never persisted as a unit.
pub type UserCostTree = BTreeMap<String, CostTree>;

//! Joins namespace, controller and container allocations into per-user trees.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::Instrument;

use super::ProcessCostDecomposer;
use crate::allocation::{AllocationEntry, AllocationSet, AllocationSource};
use crate::model::{
    CompositeKey, CostEntry, CostNode, Granularity, SyntheticBranch, TreeKey,
    UserCostTree, Window,
};
use crate::observability::process_tree_span;
use crate::{Error, Result};

/// Deadline of one allocation fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(300);

type ControllerIndex<'a> = BTreeMap<(&'a str, &'a str), Vec<(&'a str, &'a AllocationEntry)>>;
type ContainerIndex<'a> =
    BTreeMap<(&'a str, &'a str, &'a str), Vec<(&'a str, &'a AllocationEntry)>>;

pub struct CostTreeBuilder {
    source: Arc<dyn AllocationSource>,
    decomposer: ProcessCostDecomposer,
    fetch_timeout: Duration,
}

impl CostTreeBuilder {
    pub fn new(source: Arc<dyn AllocationSource>, decomposer: ProcessCostDecomposer) -> Self {
        Self {
            source,
            decomposer,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    async fn fetch(&self, window: &Window, granularity: Granularity) -> Result<AllocationSet> {
        let set = tokio::time::timeout(self.fetch_timeout, self.source.fetch(window, granularity))
            .await
            .map_err(|_| Error::Timeout {
                operation: "allocation fetch",
                after: self.fetch_timeout,
            })?
            .map_err(|source| Error::Allocation {
                granularity,
                source,
            })?;

        tracing::debug!(
            granularity = %granularity,
            entries = set.len(),
            source = self.source.name(),
            "Allocation fetched"
        );
        Ok(set)
    }

    /// One tree per user present in the namespace-granularity data.
    ///
    /// All three fetches run concurrently and must finish before anything
    /// is joined. Any fetch error, malformed key or process tree error fails
    /// the whole window.
    pub async fn build_cost_trees(&self, window: &Window) -> Result<UserCostTree> {
        let (overview, controllers, containers) = tokio::join!(
            self.fetch(window, Granularity::Namespace),
            self.fetch(window, Granularity::Controller),
            self.fetch(window, Granularity::Container),
        );
        // Inspected in a fixed order after the barrier: exactly one error surfaces.
        let overview = overview?;
        let controllers = controllers?;
        let containers = containers?;

        let namespaces = parse_all(&overview, Granularity::Namespace)?;
        let controller_keys = parse_all(&controllers, Granularity::Controller)?;
        let container_keys = parse_all(&containers, Granularity::Container)?;

        let mut by_namespace: ControllerIndex<'_> = BTreeMap::new();
        for (key, entry) in &controller_keys {
            if let Some(controller) = key.controller {
                by_namespace
                    .entry((key.user_id, key.namespace))
                    .or_default()
                    .push((controller, entry));
            }
        }

        let mut by_controller: ContainerIndex<'_> = BTreeMap::new();
        for (key, entry) in &container_keys {
            if let (Some(controller), Some(container)) = (key.controller, key.container) {
                by_controller
                    .entry((key.user_id, key.namespace, controller))
                    .or_default()
                    .push((container, entry));
            }
        }

        let mut trees = UserCostTree::new();
        for (key, entry) in &namespaces {
            let children = by_namespace
                .get(&(key.user_id, key.namespace))
                .into_iter()
                .flatten()
                .map(|(controller, controller_entry)| {
                    let containers = by_controller
                        .get(&(key.user_id, key.namespace, *controller))
                        .into_iter()
                        .flatten()
                        .map(|(container, container_entry)| {
                            (
                                container.to_string(),
                                CostNode::leaf(CostEntry::from_allocation(container_entry)),
                            )
                        })
                        .collect();
                    (
                        controller.to_string(),
                        CostNode::with_children(
                            CostEntry::from_allocation(controller_entry),
                            containers,
                        ),
                    )
                })
                .collect();

            trees.entry(key.user_id.to_string()).or_default().insert(
                TreeKey::Namespace(key.namespace.to_string()),
                CostNode::with_children(CostEntry::from_allocation(entry), children),
            );
        }

        for (user_id, tree) in trees.iter_mut() {
            let process = self
                .decomposer
                .build_process_tree(&controllers, user_id, window)
                .instrument(process_tree_span(user_id))
                .await?;
            tree.insert(TreeKey::Synthetic(SyntheticBranch::Process), process);
        }

        tracing::info!(
            window = %window,
            users = trees.len(),
            namespaces = namespaces.len(),
            controllers = controller_keys.len(),
            containers = container_keys.len(),
            "Cost trees built"
        );
        Ok(trees)
    }
}

/// Parses every key of `set`; the first malformed key aborts.
fn parse_all(
    set: &AllocationSet,
    granularity: Granularity,
) -> Result<Vec<(CompositeKey<'_>, &AllocationEntry)>> {
    set.iter()
        .map(|(raw, entry)| {
            CompositeKey::parse(raw, granularity)
                .map(|key| (key, entry))
                .map_err(Error::from)
        })
        .collect()
}

impl std::fmt::Debug for CostTreeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CostTreeBuilder")
            .field("source", &self.source.name())
            .field("decomposer", &self.decomposer)
            .field("fetch_timeout", &self.fetch_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::StaticAllocationSource;
    use crate::config::ProcessCostConfig;
    use crate::metrics::{FactorResolver, QueryTemplate, StaticMetricsBackend};
    use crate::model::{MARSHALLING, PROCESS_IO};

    fn decomposer(config: ProcessCostConfig) -> ProcessCostDecomposer {
        let backend = StaticMetricsBackend::new()
            .scalar("user_process{u=\"u1\"}", 0.5)
            .scalar("user_process{u=\"u2\"}", 0.5)
            .scalar("process_marshaller", 1.0)
            .scalar("user_marshaller{u=\"u1\"}", 1.0)
            .scalar("user_io{u=\"u1\"}", 1.0);
        ProcessCostDecomposer::new(config, FactorResolver::new(Arc::new(backend)))
    }

    fn process_config() -> ProcessCostConfig {
        ProcessCostConfig {
            process_cost_sources: vec!["u1/proc/deployment:engine".into()],
            user_process_cost_fraction_query: QueryTemplate::new("user_process{u=\"$user_id\"}"),
            process_marshaller_cost_fraction_query: QueryTemplate::new("process_marshaller"),
            user_marshaller_cost_fraction_query: QueryTemplate::new(
                "user_marshaller{u=\"$user_id\"}",
            ),
            user_process_io_cost_fraction_query: QueryTemplate::new("user_io{u=\"$user_id\"}"),
            ..Default::default()
        }
    }

    fn builder(source: StaticAllocationSource) -> CostTreeBuilder {
        CostTreeBuilder::new(Arc::new(source), decomposer(ProcessCostConfig::default()))
    }

    fn window() -> Window {
        Window::month(2024, 1).unwrap()
    }

    fn scenario() -> StaticAllocationSource {
        StaticAllocationSource::new()
            .with(
                Granularity::Namespace,
                "u1/ns1",
                AllocationEntry::new(10.0, 5.0, 1.0),
            )
            .with(
                Granularity::Controller,
                "u1/ns1/ctrlA",
                AllocationEntry::new(4.0, 2.0, 0.0),
            )
            .with(
                Granularity::Container,
                "u1/ns1/ctrlA/c1",
                AllocationEntry::new(4.0, 2.0, 0.0),
            )
    }

    #[tokio::test]
    async fn test_end_to_end_tree() {
        let trees = builder(scenario()).build_cost_trees(&window()).await.unwrap();

        assert_eq!(trees.len(), 1);
        let ns1 = trees["u1"].namespace("ns1").unwrap();
        assert_eq!(ns1.month.cpu, 10.0);
        assert_eq!(ns1.month.ram, 5.0);
        assert_eq!(ns1.month.storage, 1.0);

        let ctrl = ns1.child("ctrlA").unwrap();
        assert_eq!((ctrl.month.cpu, ctrl.month.ram, ctrl.month.storage), (4.0, 2.0, 0.0));
        let c1 = ctrl.child("c1").unwrap();
        assert_eq!((c1.month.cpu, c1.month.ram, c1.month.storage), (4.0, 2.0, 0.0));
        assert!(c1.month.source.is_some());
    }

    #[tokio::test]
    async fn test_parent_values_are_not_rederived() {
        let source = scenario().with(
            Granularity::Controller,
            "u1/ns1/ctrlB",
            AllocationEntry::new(100.0, 0.0, 0.0),
        );
        let trees = builder(source).build_cost_trees(&window()).await.unwrap();

        let ns1 = trees["u1"].namespace("ns1").unwrap();
        assert_eq!(ns1.month.cpu, 10.0);
        assert_eq!(ns1.children_total().cpu, 104.0);
    }

    #[tokio::test]
    async fn test_container_joins_only_its_controller() {
        let source = scenario()
            .with(
                Granularity::Controller,
                "u1/ns1/ctrlB",
                AllocationEntry::new(1.0, 1.0, 0.0),
            )
            .with(
                Granularity::Container,
                "u1/ns1/ctrlA/podX",
                AllocationEntry::new(2.0, 1.0, 0.0),
            )
            .with(
                Granularity::Container,
                "u1/ns2/ctrlA/podY",
                AllocationEntry::new(2.0, 1.0, 0.0),
            );
        let trees = builder(source).build_cost_trees(&window()).await.unwrap();

        let ns1 = trees["u1"].namespace("ns1").unwrap();
        assert!(ns1.child("ctrlA").unwrap().child("podX").is_some());
        assert!(ns1.child("ctrlB").unwrap().children.is_empty());
        assert!(ns1.child("ctrlA").unwrap().child("podY").is_none());
        // No namespace-level entry for ns2, so nothing of it is attached.
        assert!(trees["u1"].namespace("ns2").is_none());
    }

    #[tokio::test]
    async fn test_users_are_separated() {
        let source = scenario()
            .with(
                Granularity::Namespace,
                "u2/ns1",
                AllocationEntry::new(3.0, 0.0, 0.0),
            )
            .with(
                Granularity::Controller,
                "u2/ns1/ctrlA",
                AllocationEntry::new(3.0, 0.0, 0.0),
            );
        let trees = builder(source).build_cost_trees(&window()).await.unwrap();

        assert_eq!(trees.len(), 2);
        assert_eq!(
            trees["u2"].namespace("ns1").unwrap().child("ctrlA").unwrap().month.cpu,
            3.0
        );
        assert_eq!(
            trees["u1"].namespace("ns1").unwrap().child("ctrlA").unwrap().month.cpu,
            4.0
        );
    }

    #[tokio::test]
    async fn test_malformed_controller_key_fails_window() {
        for bad in ["u1/ns1", "u1/ns1/ctrlA/extra"] {
            let source = scenario().with(
                Granularity::Controller,
                bad,
                AllocationEntry::new(1.0, 0.0, 0.0),
            );
            let err = builder(source)
                .build_cost_trees(&window())
                .await
                .unwrap_err();
            match err {
                Error::Structural(key) => {
                    assert_eq!(key.granularity, Granularity::Controller);
                    assert_eq!(key.key, bad);
                }
                other => panic!("unexpected: {}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_fetch_failure_fails_window() {
        let source = scenario().failing(Granularity::Container, "opencost down");
        let err = builder(source)
            .build_cost_trees(&window())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Allocation {
                granularity: Granularity::Container,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_first_error_in_fixed_order() {
        let source = scenario()
            .failing(Granularity::Container, "containers down")
            .failing(Granularity::Controller, "controllers down");
        let err = builder(source)
            .build_cost_trees(&window())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Allocation {
                granularity: Granularity::Controller,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_timeout() {
        let source = scenario().delayed(Granularity::Namespace, Duration::from_secs(10));
        let err = builder(source)
            .with_fetch_timeout(Duration::from_secs(1))
            .build_cost_trees(&window())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Timeout {
                operation: "allocation fetch",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_fetches_run_concurrently() {
        let source = scenario()
            .delayed(Granularity::Namespace, Duration::from_millis(200))
            .delayed(Granularity::Controller, Duration::from_millis(200))
            .delayed(Granularity::Container, Duration::from_millis(200));
        let started = std::time::Instant::now();
        builder(source).build_cost_trees(&window()).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(550));
    }

    #[tokio::test]
    async fn test_process_branch_is_disjoint_from_namespaces() {
        let source = scenario()
            .with(
                Granularity::Namespace,
                "u1/process",
                AllocationEntry::new(9.0, 0.0, 0.0),
            )
            .with(
                Granularity::Controller,
                "u1/proc/deployment:engine",
                AllocationEntry::new(8.0, 4.0, 0.0),
            );
        let builder = CostTreeBuilder::new(Arc::new(source), decomposer(process_config()));
        let trees = builder.build_cost_trees(&window()).await.unwrap();

        let tree = &trees["u1"];
        assert_eq!(tree.namespace("process").unwrap().month.cpu, 9.0);

        let process = tree.process().unwrap();
        assert_eq!(process.month, CostEntry::new(4.0, 2.0, 0.0));
        assert!(process.child("engine").is_some());
        assert!(process.child(MARSHALLING).is_some());
        assert!(process.child(PROCESS_IO).is_some());
        assert_eq!(tree.len(), 3);
    }
}

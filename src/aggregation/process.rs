//! Decomposition of process workload cost into per-user, per-process and
//! per-process-definition shares.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::Result;
use crate::allocation::AllocationSet;
use crate::config::ProcessCostConfig;
use crate::config::settings::process_name;
use crate::metrics::FactorResolver;
use crate::model::{CostEntry, CostNode, MARSHALLING, PROCESS_IO, Window};

pub struct ProcessCostDecomposer {
    config: Arc<ProcessCostConfig>,
    resolver: FactorResolver,
}

impl ProcessCostDecomposer {
    pub fn new(config: ProcessCostConfig, resolver: FactorResolver) -> Self {
        Self {
            config: Arc::new(config),
            resolver,
        }
    }

    pub fn config(&self) -> &ProcessCostConfig {
        &self.config
    }

    /// Builds the `process` root for one user from controller-granularity data.
    ///
    /// The root's `month` is the sum of the per-process children only; the
    /// `marshalling` and `process-io` shares are children that do not count
    /// towards it.
    pub async fn build_process_tree(
        &self,
        controllers: &AllocationSet,
        user_id: &str,
        window: &Window,
    ) -> Result<CostNode> {
        let config = &*self.config;
        let user_process_factor = self
            .resolver
            .scalar(
                &config.user_process_cost_fraction_query,
                Some(user_id),
                window,
            )
            .await?;

        let mut root = CostNode::default();
        let mut marshalling_total = CostEntry::default();
        let mut process_io_total = CostEntry::default();

        // Sorted so factor queries run in a stable order.
        let ordered: BTreeMap<&String, _> = controllers.iter().collect();
        for (key, allocation) in ordered {
            let raw = CostEntry::from_allocation(allocation);

            if config.is_process_source(key) {
                let month = raw.scale(user_process_factor);
                let children = self
                    .process_definitions(key, &month, user_id, window)
                    .await?;
                root.month.add(&month);
                root.children.insert(
                    process_name(key).to_string(),
                    CostNode::with_children(month, children),
                );
            }
            if config.is_marshalling_source(key) {
                marshalling_total.add(&raw);
            }
            if config.is_process_io_source(key) {
                process_io_total.add(&raw);
            }
        }

        let process_marshaller_factor = self
            .resolver
            .scalar(&config.process_marshaller_cost_fraction_query, None, window)
            .await?;
        let user_marshaller_factor = self
            .resolver
            .scalar(
                &config.user_marshaller_cost_fraction_query,
                Some(user_id),
                window,
            )
            .await?;
        let marshalling = marshalling_total
            .scale(process_marshaller_factor)
            .scale(user_marshaller_factor);
        root.children
            .insert(MARSHALLING.to_string(), CostNode::leaf(marshalling));

        let user_process_io_factor = self
            .resolver
            .scalar(
                &config.user_process_io_cost_fraction_query,
                Some(user_id),
                window,
            )
            .await?;
        root.children.insert(
            PROCESS_IO.to_string(),
            CostNode::leaf(process_io_total.scale(user_process_io_factor)),
        );

        tracing::debug!(
            user_id,
            processes = root.children.len() - 2,
            user_process_factor,
            process_marshaller_factor,
            user_marshaller_factor,
            user_process_io_factor,
            "Process tree built"
        );
        Ok(root)
    }

    /// Splits one process's user cost over its process definitions. Empty
    /// when the source has no configured instance id.
    async fn process_definitions(
        &self,
        source: &str,
        month: &CostEntry,
        user_id: &str,
        window: &Window,
    ) -> Result<BTreeMap<String, CostNode>> {
        let Some(instance_id) = self.config.instance_id(source) else {
            return Ok(BTreeMap::new());
        };

        let factors = self
            .resolver
            .factor_map(
                &self.config.user_process_definition_cost_fraction_query,
                Some(user_id),
                Some(instance_id),
                window,
            )
            .await?;

        Ok(factors
            .into_iter()
            .map(|(definition, factor)| (definition, CostNode::leaf(month.scale(factor))))
            .collect())
    }
}

impl std::fmt::Debug for ProcessCostDecomposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessCostDecomposer")
            .field("process_cost_sources", &self.config.process_cost_sources)
            .field("resolver", &self.resolver)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::AllocationEntry;
    use crate::metrics::{QueryTemplate, QueryValue, Sample, StaticMetricsBackend};

    const ENGINE: &str = "u1/proc/deployment:engine";
    const WORKER: &str = "u1/proc/deployment:worker";
    const MARSHALLER: &str = "u1/proc/deployment:marshaller";
    const CONNECTOR: &str = "u1/proc/deployment:connector";

    fn config() -> ProcessCostConfig {
        ProcessCostConfig {
            process_cost_sources: vec![ENGINE.into(), WORKER.into()],
            marshalling_cost_sources: vec![MARSHALLER.into()],
            process_io_cost_sources: vec![CONNECTOR.into()],
            user_process_cost_fraction_query: QueryTemplate::new("user_process{u=\"$user_id\"}"),
            process_marshaller_cost_fraction_query: QueryTemplate::new("process_marshaller"),
            user_marshaller_cost_fraction_query: QueryTemplate::new(
                "user_marshaller{u=\"$user_id\"}",
            ),
            user_process_io_cost_fraction_query: QueryTemplate::new("user_io{u=\"$user_id\"}"),
            user_process_definition_cost_fraction_query: QueryTemplate::new(
                "definitions{u=\"$user_id\",i=\"$instance_id\"}",
            ),
            process_definition_instance_ids: [(ENGINE.to_string(), "engine-0".to_string())]
                .into_iter()
                .collect(),
        }
    }

    fn controllers() -> AllocationSet {
        [
            (ENGINE, AllocationEntry::new(100.0, 40.0, 10.0)),
            (WORKER, AllocationEntry::new(20.0, 20.0, 0.0)),
            (MARSHALLER, AllocationEntry::new(50.0, 10.0, 0.0)),
            (CONNECTOR, AllocationEntry::new(8.0, 4.0, 2.0)),
            ("u1/ns1/ctrlA", AllocationEntry::new(7.0, 7.0, 7.0)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    fn backend() -> StaticMetricsBackend {
        StaticMetricsBackend::new()
            .scalar("user_process{u=\"u1\"}", 0.5)
            .scalar("process_marshaller", 0.4)
            .scalar("user_marshaller{u=\"u1\"}", 0.5)
            .scalar("user_io{u=\"u1\"}", 0.25)
            .respond(
                "definitions{u=\"u1\",i=\"engine-0\"}",
                QueryValue::Vector(vec![
                    Sample::new(3.0).label("process_definition", "billing"),
                    Sample::new(1.0).label("process_definition", "alerts"),
                ]),
            )
    }

    fn decomposer(backend: StaticMetricsBackend) -> ProcessCostDecomposer {
        ProcessCostDecomposer::new(config(), FactorResolver::new(Arc::new(backend)))
    }

    fn window() -> Window {
        Window::month(2024, 1).unwrap()
    }

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{} != {}", a, b);
    }

    #[tokio::test]
    async fn test_process_tree_shares() {
        let root = decomposer(backend())
            .build_process_tree(&controllers(), "u1", &window())
            .await
            .unwrap();

        let engine = root.child("engine").unwrap();
        assert_eq!(engine.month, CostEntry::new(50.0, 20.0, 5.0));
        let worker = root.child("worker").unwrap();
        assert_eq!(worker.month, CostEntry::new(10.0, 10.0, 0.0));
        assert!(worker.children.is_empty());

        assert_eq!(root.month, CostEntry::new(60.0, 30.0, 5.0));

        let marshalling = root.child(MARSHALLING).unwrap();
        assert_close(marshalling.month.cpu, 50.0 * 0.4 * 0.5);
        assert_close(marshalling.month.ram, 10.0 * 0.4 * 0.5);

        let io = root.child(PROCESS_IO).unwrap();
        assert_eq!(io.month, CostEntry::new(2.0, 1.0, 0.5));

        assert!(root.child("ctrlA").is_none());
        assert_eq!(root.children.len(), 4);
    }

    #[tokio::test]
    async fn test_process_definitions_sum_to_parent() {
        let root = decomposer(backend())
            .build_process_tree(&controllers(), "u1", &window())
            .await
            .unwrap();

        let engine = root.child("engine").unwrap();
        assert_close(engine.child("billing").unwrap().month.cpu, 37.5);
        assert_close(engine.child("alerts").unwrap().month.cpu, 12.5);

        let total = engine.children_total();
        assert_close(total.cpu, engine.month.cpu);
        assert_close(total.ram, engine.month.ram);
        assert_close(total.storage, engine.month.storage);
    }

    #[tokio::test]
    async fn test_undefined_factors_attribute_nothing() {
        // Every scalar query falls back to NaN.
        let root = decomposer(StaticMetricsBackend::new())
            .build_process_tree(&controllers(), "u1", &window())
            .await
            .unwrap();

        assert!(root.month.is_zero());
        assert!(root.child("engine").unwrap().month.is_zero());
        assert!(root.child(MARSHALLING).unwrap().month.is_zero());
        assert!(root.child(PROCESS_IO).unwrap().month.is_zero());
    }

    #[tokio::test]
    async fn test_infinite_factor_keeps_snapshot_serializable() {
        use crate::model::{BillingSnapshot, CostTree, SyntheticBranch, TreeKey};

        let backend = backend().scalar("user_io{u=\"u1\"}", f64::INFINITY);
        let mut controllers = controllers();
        controllers.remove(CONNECTOR);

        let root = decomposer(backend)
            .build_process_tree(&controllers, "u1", &window())
            .await
            .unwrap();
        assert!(root.child(PROCESS_IO).unwrap().month.is_zero());

        let mut tree = CostTree::new();
        tree.insert(TreeKey::Synthetic(SyntheticBranch::Process), root);
        let snapshot = BillingSnapshot::new("u1", window(), window().to, tree);

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(!json.contains("null"));
        let restored: BillingSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(serde_json::to_string(&restored).unwrap(), json);
    }

    #[tokio::test]
    async fn test_zero_sum_definition_factors() {
        let backend = backend().respond(
            "definitions{u=\"u1\",i=\"engine-0\"}",
            QueryValue::Vector(vec![
                Sample::new(0.0).label("process_definition", "billing"),
                Sample::new(0.0).label("process_definition", "alerts"),
            ]),
        );
        let root = decomposer(backend)
            .build_process_tree(&controllers(), "u1", &window())
            .await
            .unwrap();

        let engine = root.child("engine").unwrap();
        assert_eq!(engine.children.len(), 2);
        assert!(engine.children.values().all(|c| c.month.is_zero()));
        assert!(engine.month.cpu.is_finite());
    }

    #[tokio::test]
    async fn test_no_sources_yields_empty_shares() {
        let root = decomposer(backend())
            .build_process_tree(&AllocationSet::new(), "u1", &window())
            .await
            .unwrap();

        assert!(root.month.is_zero());
        assert_eq!(
            root.children.keys().map(String::as_str).collect::<Vec<_>>(),
            vec![MARSHALLING, PROCESS_IO]
        );
    }

    #[tokio::test]
    async fn test_metrics_failure_propagates() {
        let backend = backend().fail("process_marshaller", "backend down");
        let result = decomposer(backend)
            .build_process_tree(&controllers(), "u1", &window())
            .await;
        assert!(matches!(result, Err(crate::Error::Metrics(_))));
    }
}

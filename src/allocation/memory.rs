//! In-memory allocation source for tests and dry runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{AllocationEntry, AllocationError, AllocationResult, AllocationSet, AllocationSource};
use crate::model::{Granularity, Window};

/// Serves fixed allocation sets regardless of the requested window.
#[derive(Debug, Default)]
pub struct StaticAllocationSource {
    sets: HashMap<Granularity, AllocationSet>,
    failures: HashMap<Granularity, String>,
    delays: HashMap<Granularity, Duration>,
    calls: AtomicUsize,
}

impl StaticAllocationSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(
        mut self,
        granularity: Granularity,
        key: impl Into<String>,
        entry: AllocationEntry,
    ) -> Self {
        self.sets
            .entry(granularity)
            .or_default()
            .insert(key.into(), entry);
        self
    }

    pub fn with_set(mut self, granularity: Granularity, set: AllocationSet) -> Self {
        self.sets.insert(granularity, set);
        self
    }

    /// Makes every fetch of `granularity` fail.
    pub fn failing(mut self, granularity: Granularity, message: impl Into<String>) -> Self {
        self.failures.insert(granularity, message.into());
        self
    }

    /// Delays every fetch of `granularity`.
    pub fn delayed(mut self, granularity: Granularity, delay: Duration) -> Self {
        self.delays.insert(granularity, delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl AllocationSource for StaticAllocationSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch(
        &self,
        _window: &Window,
        granularity: Granularity,
    ) -> AllocationResult<AllocationSet> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delays.get(&granularity) {
            tokio::time::sleep(*delay).await;
        }
        if let Some(message) = self.failures.get(&granularity) {
            return Err(AllocationError::Unavailable(message.clone()));
        }
        Ok(self.sets.get(&granularity).cloned().unwrap_or_default())
    }
}

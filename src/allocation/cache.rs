//! Time-bounded allocation response cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{AllocationResult, AllocationSet, AllocationSource};
use crate::model::{Granularity, Window};

const DEFAULT_TTL: Duration = Duration::from_secs(600);

struct Cached {
    set: AllocationSet,
    expires_at: Instant,
}

impl Cached {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Caching wrapper around any [`AllocationSource`], keyed by window and granularity.
pub struct CachedAllocationSource<S> {
    inner: S,
    cache: Arc<RwLock<HashMap<(Window, Granularity), Cached>>>,
    ttl: Duration,
}

impl<S: AllocationSource> CachedAllocationSource<S> {
    pub fn new(source: S) -> Self {
        Self {
            inner: source,
            cache: Arc::new(RwLock::new(HashMap::new())),
            ttl: DEFAULT_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub async fn invalidate(&self) {
        self.cache.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.is_empty()
    }
}

#[async_trait]
impl<S: AllocationSource> AllocationSource for CachedAllocationSource<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn fetch(
        &self,
        window: &Window,
        granularity: Granularity,
    ) -> AllocationResult<AllocationSet> {
        let key = (*window, granularity);
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(&key)
                && entry.is_live(Instant::now())
            {
                tracing::trace!(%window, %granularity, "Allocation cache hit");
                return Ok(entry.set.clone());
            }
        }

        let set = self.inner.fetch(window, granularity).await?;

        let now = Instant::now();
        let mut cache = self.cache.write().await;
        cache.retain(|_, entry| entry.is_live(now));
        cache.insert(
            key,
            Cached {
                set: set.clone(),
                expires_at: now + self.ttl,
            },
        );

        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::{AllocationEntry, StaticAllocationSource};

    fn source() -> StaticAllocationSource {
        StaticAllocationSource::new()
            .with(Granularity::Namespace, "u1/ns1", AllocationEntry::new(1.0, 1.0, 1.0))
    }

    #[tokio::test]
    async fn test_caching() {
        let cached = CachedAllocationSource::new(source());
        let window = Window::month(2024, 1).unwrap();

        cached.fetch(&window, Granularity::Namespace).await.unwrap();
        assert_eq!(1, cached.inner().call_count());

        let set = cached.fetch(&window, Granularity::Namespace).await.unwrap();
        assert_eq!(1, cached.inner().call_count());
        assert!(set.contains_key("u1/ns1"));

        cached.fetch(&window, Granularity::Controller).await.unwrap();
        assert_eq!(2, cached.inner().call_count());
    }

    #[tokio::test]
    async fn test_invalidate() {
        let cached = CachedAllocationSource::new(source());
        let window = Window::month(2024, 1).unwrap();

        cached.fetch(&window, Granularity::Namespace).await.unwrap();
        cached.invalidate().await;
        assert!(cached.is_empty().await);

        cached.fetch(&window, Granularity::Namespace).await.unwrap();
        assert_eq!(2, cached.inner().call_count());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cached = CachedAllocationSource::new(source()).with_ttl(Duration::from_millis(10));
        let window = Window::month(2024, 1).unwrap();

        cached.fetch(&window, Granularity::Namespace).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        cached.fetch(&window, Granularity::Namespace).await.unwrap();

        assert_eq!(2, cached.inner().call_count());
        assert_eq!(1, cached.len().await);
    }

    #[tokio::test]
    async fn test_errors_not_cached() {
        let cached =
            CachedAllocationSource::new(source().failing(Granularity::Container, "down"));
        let window = Window::month(2024, 1).unwrap();

        assert!(cached.fetch(&window, Granularity::Container).await.is_err());
        assert!(cached.is_empty().await);
    }
}

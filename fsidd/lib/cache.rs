//! A read-through cache in front of the fsid store.
//!
//! Once a path has an fsid the pair never changes, so resolved pairs are kept for the lifetime
//! of the process. Concurrent misses for the same key are not coalesced; they race each other
//! through the store, which arbitrates allocations, and all of them end up storing the same
//! pair. Errors and missing entries are never cached.

use dashmap::DashMap;

use crate::{
    context::RequestContext,
    retry::Retrier,
    store::FsidSource,
    FsiddError, FsiddResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Caches the path/fsid bijection of an [`FsidSource`].
///
/// Every call that reaches the source goes through the [`Retrier`].
#[derive(Debug)]
pub struct FsidCache<S> {
    source: S,
    retrier: Retrier,
    enabled: bool,
    fsids: DashMap<String, i32>,
    paths: DashMap<i32, String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<S> FsidCache<S>
where
    S: FsidSource,
{
    /// Creates a cache over `source`.
    ///
    /// With `enabled` set to `false` every lookup goes to the source.
    pub fn new(source: S, retrier: Retrier, enabled: bool) -> Self {
        Self {
            source,
            retrier,
            enabled,
            fsids: DashMap::new(),
            paths: DashMap::new(),
        }
    }

    /// Returns the wrapped source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Returns the retrier used for source calls.
    pub fn retrier(&self) -> &Retrier {
        &self.retrier
    }

    /// Returns `true` if lookups are served from memory.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the number of cached pairs.
    pub fn len(&self) -> usize {
        self.fsids.len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.fsids.is_empty()
    }

    /// Looks up the fsid of `path`, returning `None` if it has not been allocated.
    pub async fn get_fsid(&self, ctx: &RequestContext, path: &str) -> FsiddResult<Option<i32>> {
        if let Some(fsid) = self.cached_fsid(path) {
            return Ok(Some(fsid));
        }

        let result = self
            .retrier
            .run(ctx, || self.source.get_fsid(path))
            .await;

        match not_found_as_none(result)? {
            Some(fsid) => {
                self.store(fsid, path);
                Ok(Some(fsid))
            }
            None => Ok(None),
        }
    }

    /// Allocates an fsid for `path`.
    ///
    /// A cached pair is returned as is. If the store already holds the path, the existing fsid
    /// is looked up and returned.
    pub async fn allocate_fsid(&self, ctx: &RequestContext, path: &str) -> FsiddResult<i32> {
        if let Some(fsid) = self.cached_fsid(path) {
            return Ok(fsid);
        }

        let fsid = self
            .retrier
            .run(ctx, || async move {
                match self.source.allocate_fsid(path).await {
                    Err(e) if e.is_conflict() => match self.source.get_fsid(path).await {
                        // the row vanished between the two calls; retry the allocation
                        Err(lookup) if lookup.is_not_found() => Err(e),
                        result => result,
                    },
                    result => result,
                }
            })
            .await?;

        self.store(fsid, path);
        Ok(fsid)
    }

    /// Returns the fsid of `path`, allocating one if the path has none.
    ///
    /// The lookup and the allocation are retried as one unit. An allocation that loses a race
    /// fails with a uniqueness conflict, and the next attempt finds the winner's fsid.
    pub async fn get_or_allocate_fsid(
        &self,
        ctx: &RequestContext,
        path: &str,
    ) -> FsiddResult<i32> {
        if let Some(fsid) = self.cached_fsid(path) {
            return Ok(fsid);
        }

        let fsid = self
            .retrier
            .run(ctx, || async move {
                match self.source.get_fsid(path).await {
                    Err(e) if e.is_not_found() => self.source.allocate_fsid(path).await,
                    result => result,
                }
            })
            .await?;

        self.store(fsid, path);
        Ok(fsid)
    }

    /// Looks up the path of `fsid`, returning `None` if it has never been issued.
    pub async fn get_path(&self, ctx: &RequestContext, fsid: i32) -> FsiddResult<Option<String>> {
        if let Some(path) = self.cached_path(fsid) {
            return Ok(Some(path));
        }

        let result = self
            .retrier
            .run(ctx, || self.source.get_path(fsid))
            .await;

        match not_found_as_none(result)? {
            Some(path) => {
                self.store(fsid, &path);
                Ok(Some(path))
            }
            None => Ok(None),
        }
    }

    // The map guards are dropped before returning so no shard lock is held across an await.
    fn cached_fsid(&self, path: &str) -> Option<i32> {
        if !self.enabled {
            return None;
        }

        self.fsids.get(path).map(|entry| *entry.value())
    }

    fn cached_path(&self, fsid: i32) -> Option<String> {
        if !self.enabled {
            return None;
        }

        self.paths.get(&fsid).map(|entry| entry.value().clone())
    }

    fn store(&self, fsid: i32, path: &str) {
        if !self.enabled {
            return;
        }

        self.fsids.insert(path.to_string(), fsid);
        self.paths.insert(fsid, path.to_string());
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn not_found_as_none<T>(result: FsiddResult<T>) -> FsiddResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(FsiddError::Store(e)) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    };

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use crate::store::{MemoryFsidStore, StoreError, StoreResult};

    use super::*;

    /// Counts calls into a memory store. It can fail the first few lookups transiently, or
    /// fail every lookup permanently while `broken` is set.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryFsidStore,
        calls: AtomicU32,
        failures: AtomicU32,
        broken: AtomicBool,
    }

    #[async_trait]
    impl FsidSource for CountingStore {
        async fn get_fsid(&self, path: &str) -> StoreResult<i32> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.broken.load(Ordering::SeqCst) {
                return Err(StoreError::Other("permission denied for table fsids".into()));
            }
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::Unavailable("connection reset".into()));
            }
            self.inner.get_fsid(path).await
        }

        async fn allocate_fsid(&self, path: &str) -> StoreResult<i32> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.allocate_fsid(path).await
        }

        async fn get_path(&self, fsid: i32) -> StoreResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.broken.load(Ordering::SeqCst) {
                return Err(StoreError::Other("permission denied for table fsids".into()));
            }
            self.inner.get_path(fsid).await
        }
    }

    fn context() -> RequestContext {
        RequestContext::new("TEST", CancellationToken::new())
    }

    #[test_log::test(tokio::test)]
    async fn test_cache_hit_skips_store() -> anyhow::Result<()> {
        let cache = FsidCache::new(CountingStore::default(), Retrier::default(), true);
        let ctx = context();

        assert_eq!(cache.get_or_allocate_fsid(&ctx, "/srv/a").await?, 1);
        let calls = cache.source().calls.load(Ordering::SeqCst);

        assert_eq!(cache.get_fsid(&ctx, "/srv/a").await?, Some(1));
        assert_eq!(cache.get_path(&ctx, 1).await?, Some("/srv/a".to_string()));
        assert_eq!(cache.allocate_fsid(&ctx, "/srv/a").await?, 1);
        assert_eq!(cache.source().calls.load(Ordering::SeqCst), calls);
        assert_eq!(cache.len(), 1);

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_cache_does_not_store_misses() -> anyhow::Result<()> {
        let cache = FsidCache::new(CountingStore::default(), Retrier::default(), true);
        let ctx = context();

        assert_eq!(cache.get_fsid(&ctx, "/srv/missing").await?, None);
        assert_eq!(cache.get_path(&ctx, 5).await?, None);
        assert!(cache.is_empty());

        assert_eq!(cache.get_fsid(&ctx, "/srv/missing").await?, None);
        assert_eq!(cache.source().calls.load(Ordering::SeqCst), 3);

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_cache_does_not_store_errors() -> anyhow::Result<()> {
        let store = CountingStore::default();
        store.inner.allocate_fsid("/srv/a").await?;
        store.broken.store(true, Ordering::SeqCst);
        let cache = FsidCache::new(store, Retrier::default(), true);
        let ctx = context();

        for _ in 0..2 {
            assert!(matches!(
                cache.get_fsid(&ctx, "/srv/a").await,
                Err(FsiddError::Store(StoreError::Other(_)))
            ));
            assert!(matches!(
                cache.get_path(&ctx, 1).await,
                Err(FsiddError::Store(StoreError::Other(_)))
            ));
        }
        assert_eq!(cache.source().calls.load(Ordering::SeqCst), 4);
        assert!(cache.is_empty());

        cache.source().broken.store(false, Ordering::SeqCst);
        assert_eq!(cache.get_fsid(&ctx, "/srv/a").await?, Some(1));
        assert_eq!(cache.source().calls.load(Ordering::SeqCst), 5);

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_disabled_cache_always_reaches_store() -> anyhow::Result<()> {
        let cache = FsidCache::new(CountingStore::default(), Retrier::default(), false);
        let ctx = context();

        cache.get_or_allocate_fsid(&ctx, "/srv/a").await?;
        let calls = cache.source().calls.load(Ordering::SeqCst);

        assert_eq!(cache.get_fsid(&ctx, "/srv/a").await?, Some(1));
        assert_eq!(cache.get_path(&ctx, 1).await?, Some("/srv/a".to_string()));
        assert_eq!(cache.source().calls.load(Ordering::SeqCst), calls + 2);
        assert!(cache.is_empty());

        Ok(())
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_cache_retries_transient_failures() -> anyhow::Result<()> {
        let store = CountingStore::default();
        store.failures.store(2, Ordering::SeqCst);
        let cache = FsidCache::new(store, Retrier::default(), true);
        let ctx = context();

        assert_eq!(cache.get_or_allocate_fsid(&ctx, "/srv/a").await?, 1);
        assert_eq!(ctx.recorder().retries(), 2);

        Ok(())
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_allocate_returns_existing_fsid_on_conflict() -> anyhow::Result<()> {
        let store = Arc::new(MemoryFsidStore::new());
        store.allocate_fsid("/srv/a").await?;

        let cache = FsidCache::new(store.clone(), Retrier::default(), true);
        let ctx = context();

        assert_eq!(cache.allocate_fsid(&ctx, "/srv/a").await?, 1);
        assert_eq!(ctx.recorder().retries(), 0);
        assert_eq!(store.allocations(), 1);
        assert_eq!(cache.get_path(&ctx, 1).await?, Some("/srv/a".to_string()));

        Ok(())
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_allocate_resolves_lost_race() -> anyhow::Result<()> {
        let store = Arc::new(MemoryFsidStore::new());
        store.allocate_fsid("/srv/a").await?;

        // a second daemon sharing the store has never seen the path
        let cache = FsidCache::new(store.clone(), Retrier::default(), true);
        let ctx = context();

        assert_eq!(cache.get_or_allocate_fsid(&ctx, "/srv/a").await?, 1);
        assert_eq!(store.allocations(), 1);

        Ok(())
    }
}

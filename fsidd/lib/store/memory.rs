use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{FsidSource, StoreError, StoreResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An in-memory fsid store.
///
/// Fsids are issued from 1 upward. Allocating a path that already has an fsid fails with
/// [`StoreError::Conflict`], mirroring the uniqueness constraint of the SQL store, so callers
/// exercise the same conflict-and-retry path either way.
#[derive(Debug, Default)]
pub struct MemoryFsidStore {
    /// The path/fsid bijection.
    state: Mutex<MemoryState>,

    /// Number of successful allocations.
    allocations: AtomicUsize,
}

#[derive(Debug)]
struct MemoryState {
    fsids: HashMap<String, i32>,
    paths: HashMap<i32, String>,
    next_fsid: i32,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl MemoryFsidStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of allocations that succeeded.
    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }

    /// Returns the number of allocated paths.
    pub async fn len(&self) -> usize {
        self.state.lock().await.fsids.len()
    }

    /// Returns `true` if no path has been allocated.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            fsids: HashMap::new(),
            paths: HashMap::new(),
            next_fsid: 1,
        }
    }
}

#[async_trait]
impl FsidSource for MemoryFsidStore {
    async fn get_fsid(&self, path: &str) -> StoreResult<i32> {
        let state = self.state.lock().await;
        state.fsids.get(path).copied().ok_or(StoreError::NotFound)
    }

    async fn allocate_fsid(&self, path: &str) -> StoreResult<i32> {
        let mut state = self.state.lock().await;
        if state.fsids.contains_key(path) {
            return Err(StoreError::Conflict(path.to_string()));
        }

        let fsid = state.next_fsid;
        state.next_fsid = fsid
            .checked_add(1)
            .ok_or_else(|| StoreError::Other("fsid space exhausted".to_string()))?;
        state.fsids.insert(path.to_string(), fsid);
        state.paths.insert(fsid, path.to_string());
        self.allocations.fetch_add(1, Ordering::SeqCst);

        Ok(fsid)
    }

    async fn get_path(&self, fsid: i32) -> StoreResult<String> {
        let state = self.state.lock().await;
        state.paths.get(&fsid).cloned().ok_or(StoreError::NotFound)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

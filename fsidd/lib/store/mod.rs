//! The persistent fsid store.
//!
//! The rest of the crate only depends on the [`FsidSource`] contract. Two implementations are
//! provided: [`SqlFsidStore`] keeps the mapping in a SQL table, [`MemoryFsidStore`] keeps it in
//! process memory for tests and local experiments.
//!
//! The store owns the consistency of the path/fsid bijection. Concurrent allocations of the same
//! path are not serialized here: exactly one insert succeeds and the rest fail with a
//! uniqueness violation, which the retry loop turns into a lookup of the winner's row.

mod error;
mod memory;
mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use error::*;
pub use memory::*;
pub use sqlite::*;

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// The capability surface required from a durable fsid store.
#[async_trait]
pub trait FsidSource: Send + Sync {
    /// Looks up the fsid allocated to `path`.
    ///
    /// Returns [`StoreError::NotFound`] if the path has never been allocated.
    async fn get_fsid(&self, path: &str) -> StoreResult<i32>;

    /// Allocates a new fsid for `path`.
    ///
    /// Fails with a retryable uniqueness violation if `path` already has an fsid.
    async fn allocate_fsid(&self, path: &str) -> StoreResult<i32>;

    /// Looks up the path an fsid was allocated to.
    ///
    /// Returns [`StoreError::NotFound`] if the fsid has never been issued.
    async fn get_path(&self, fsid: i32) -> StoreResult<String>;
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl<S: FsidSource + ?Sized> FsidSource for Arc<S> {
    async fn get_fsid(&self, path: &str) -> StoreResult<i32> {
        (**self).get_fsid(path).await
    }

    async fn allocate_fsid(&self, path: &str) -> StoreResult<i32> {
        (**self).allocate_fsid(path).await
    }

    async fn get_path(&self, fsid: i32) -> StoreResult<String> {
        (**self).get_path(fsid).await
    }
}

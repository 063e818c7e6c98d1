//! `fsidd` allocates and resolves stable filesystem ids ("fsids") for directory paths that are
//! re-exported by an NFS re-export proxy.
//!
//! # Overview
//!
//! The kernel NFS export layer needs a compact integer per exported path. `fsidd` is the
//! authority that hands these out and remembers them durably. Kernel export hooks talk to the
//! daemon over a local `SOCK_SEQPACKET` socket using a tiny text protocol:
//!
//! ```text
//! => get_or_create_fsidnum /srv/export/a
//! <= + 1
//! => get_path 1
//! <= + /srv/export/a
//! => frobnicate
//! <= - unknown command "FROBNICATE"
//! ```
//!
//! # Architecture
//!
//! - [`socket`] - the seqpacket listener, the per-connection state machine and a client
//! - [`commands`] - the four protocol verbs and their handlers
//! - [`cache`] - a read-through cache in front of the store
//! - [`retry`] - the retry/backoff orchestrator wrapping every store call
//! - [`store`] - the store contract plus SQLite and in-memory implementations
//! - [`config`] - layered configuration (defaults, file, environment, flags)
//! - [`cli`] - command line arguments for the `fsidd` and `fsidctl` binaries
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use fsidd::{
//!     cache::FsidCache,
//!     commands,
//!     retry::{Retrier, RetryPolicy},
//!     socket::Server,
//!     store::MemoryFsidStore,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = Arc::new(FsidCache::new(
//!         MemoryFsidStore::new(),
//!         Retrier::new(RetryPolicy::default()),
//!         true,
//!     ));
//!
//!     let mut server = Server::bind("/run/fsidd.sock")?;
//!     commands::register_commands(&mut server, cache);
//!
//!     let server = Arc::new(server);
//!     server.serve().await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![allow(clippy::module_inception)]

mod error;
mod log;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod cache;
pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod metrics;
pub mod retry;
pub mod socket;
pub mod store;
pub mod systemd;

pub use error::*;
pub use log::*;

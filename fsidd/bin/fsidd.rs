//! `fsidd` is the fsid allocation daemon.
//!
//! It listens on a local `SOCK_SEQPACKET` socket and answers `get_fsidnum`,
//! `get_or_create_fsidnum`, `get_path` and `version` requests from the kernel NFS export
//! hooks. Fsids are stored in an SQLite table, or in process memory with `--memory`.
//!
//! ## Usage
//!
//! ```bash
//! fsidd --socket=/run/fsidd.sock \
//!     --database-url=/var/lib/fsidd/fsids.db \
//!     --table-name=fsids \
//!     --create-table
//! ```
//!
//! Every flag can also be set in `/etc/knfsd-fsidd.toml` or through an `FSID_*` environment
//! variable. When started through socket activation the passed socket is used and `--socket`
//! is ignored.

use std::sync::Arc;

use clap::Parser;
use fsidd::{
    cache::FsidCache,
    cli::{AnsiStyles, FsiddArgs},
    commands,
    config::{Config, SHUTDOWN_TIMEOUT},
    context::RequestContext,
    retry::{Retrier, RetryPolicy},
    socket::{SeqpacketListener, Server},
    store::{FsidSource, MemoryFsidStore, SqlFsidStore},
    systemd, FsiddError,
};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = FsiddArgs::parse();

    let config = match Config::resolve(&args) {
        Ok(config) => config,
        Err(FsiddError::InvalidConfig(errors)) => {
            eprintln!("{}", "invalid configuration:".error());
            for error in errors {
                eprintln!("  - {error}");
            }
            std::process::exit(2);
        }
        Err(e) => return Err(e.into()),
    };

    fsidd::init_tracing(config.get_debug());
    tracing::info!(
        socket = %config.get_socket().display(),
        cache = config.get_cache(),
        memory = config.get_memory(),
        "starting fsidd"
    );

    let retrier = Retrier::new(RetryPolicy::default());
    if config.get_memory() {
        let store = MemoryFsidStore::new();
        run(&config, FsidCache::new(store, retrier, config.get_cache())).await
    } else {
        let database = config.get_database();
        let store = SqlFsidStore::connect(
            database.get_url(),
            database.get_table_name(),
            database.get_max_connections(),
        )
        .await?;

        if database.get_create_table() {
            let ctx = RequestContext::new("CREATE_TABLE", CancellationToken::new());
            retrier.run(&ctx, || store.create_table()).await?;
        }

        let result = run(
            &config,
            FsidCache::new(store.clone(), retrier, config.get_cache()),
        )
        .await;
        store.close().await;
        result
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

async fn run<S>(config: &Config, cache: FsidCache<S>) -> anyhow::Result<()>
where
    S: FsidSource + 'static,
{
    let mut server = match systemd::listen_fds()? {
        Some(fd) => Server::from_listener(SeqpacketListener::from_fd(fd)?),
        None => Server::bind(config.get_socket())?,
    };
    commands::register_commands(&mut server, Arc::new(cache));
    let server = Arc::new(server);

    let stopper = tokio::spawn(stop_on_signal(server.clone()));

    systemd::notify(systemd::READY);
    tracing::info!("ready");

    let result = server.serve().await;
    let result = match result {
        Err(FsiddError::ServerClosed) => {
            // a signal stopped the server; let the drain finish
            stopper.await?;
            Ok(())
        }
        Err(e) => {
            tracing::error!("error accepting connections: {e}");
            stopper.abort();
            if let Err(e) = server.close().await {
                tracing::warn!("error closing server: {e}");
            }
            Err(e.into())
        }
        Ok(()) => Ok(()),
    };

    tracing::info!("stopped");
    result
}

async fn stop_on_signal(server: Arc<Server>) {
    if let Err(e) = wait_for_signal().await {
        tracing::error!("failed to install signal handlers: {e}");
        return;
    }

    systemd::notify(systemd::STOPPING);
    tracing::info!("shutting down");

    if let Err(e) = server.shutdown(SHUTDOWN_TIMEOUT).await {
        tracing::warn!("error during shutdown: {e}");
    }
    if let Err(e) = server.close().await {
        tracing::warn!("error closing server: {e}");
    }
}

async fn wait_for_signal() -> std::io::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("received SIGTERM"),
        _ = sigint.recv() => tracing::info!("received SIGINT"),
    }

    Ok(())
}

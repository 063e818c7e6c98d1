use std::{
    collections::HashMap,
    future::Future,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::{FsiddError, FsiddResult};

use super::{connection::Connection, handler_fn, Handler, SeqpacketListener};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Accepts clients on a [`SeqpacketListener`] and dispatches their requests to the registered
/// handlers.
///
/// Handlers are registered with [`handle`](Self::handle) before the server is shared. Each
/// accepted client is served on its own task.
pub struct Server {
    listener: SeqpacketListener,
    handlers: Arc<HashMap<String, Handler>>,
    next_id: AtomicU64,
    serving: AtomicBool,
    stop: CancellationToken,
    tracker: Arc<Tracker>,
}

/// The live connections and the shutdown flag of a server.
#[derive(Default)]
pub(crate) struct Tracker {
    state: Mutex<TrackerState>,
    changed: Notify,
}

/// Marks the accept loop as running for as long as it lives, so a dropped `serve` future does
/// not leave `stop` waiting on it.
struct ListeningGuard<'a>(&'a Tracker);

#[derive(Default)]
pub(crate) struct TrackerState {
    in_shutdown: bool,
    listening: bool,
    connections: HashMap<u64, Arc<Connection>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Server {
    /// Creates a server listening at `path`.
    pub fn bind(path: impl AsRef<Path>) -> FsiddResult<Self> {
        Ok(Self::from_listener(SeqpacketListener::bind(path)?))
    }

    /// Creates a server on an existing listener.
    pub fn from_listener(listener: SeqpacketListener) -> Self {
        Self {
            listener,
            handlers: Arc::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            serving: AtomicBool::new(false),
            stop: CancellationToken::new(),
            tracker: Arc::new(Tracker::default()),
        }
    }

    /// Returns the socket file the server listens on, if it owns one.
    pub fn local_path(&self) -> Option<PathBuf> {
        self.listener.local_path()
    }

    /// Registers `handler` for the verb `cmd`. Verbs are case-insensitive.
    ///
    /// # Panics
    ///
    /// Panics if `cmd` is empty, if a handler is already registered for it, or if the server
    /// has started serving.
    pub fn handle<F, Fut>(&mut self, cmd: &str, handler: F)
    where
        F: Fn(CancellationToken, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FsiddResult<String>> + Send + 'static,
    {
        let cmd = cmd.to_uppercase();
        if cmd.is_empty() {
            panic!("cmd required");
        }
        if self.serving.load(Ordering::SeqCst) {
            panic!("handler for {cmd} registered after serving started");
        }

        let Some(handlers) = Arc::get_mut(&mut self.handlers) else {
            panic!("handler for {cmd} registered after serving started");
        };
        if handlers.contains_key(&cmd) {
            panic!("multiple registrations for {cmd}");
        }

        handlers.insert(cmd, handler_fn(handler));
    }

    /// Accepts clients until the server is shut down or closed.
    ///
    /// Returns [`FsiddError::ServerClosed`] after [`shutdown`](Self::shutdown) or
    /// [`close`](Self::close), including when either was called before `serve`. Any other
    /// error comes from accepting a client.
    pub async fn serve(&self) -> FsiddResult<()> {
        let Some(_listening) = ListeningGuard::start(&self.tracker) else {
            return Err(FsiddError::ServerClosed);
        };
        self.serving.store(true, Ordering::SeqCst);

        self.accept_loop().await
    }

    async fn accept_loop(&self) -> FsiddResult<()> {
        loop {
            let stream = tokio::select! {
                biased;
                _ = self.stop.cancelled() => return Err(FsiddError::ServerClosed),
                result = self.listener.accept() => result?,
            };

            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            let connection = Arc::new(Connection::new(
                id,
                stream,
                self.handlers.clone(),
                self.tracker.clone(),
            ));

            if !self.tracker.track(connection.clone()) {
                // shutdown began between accept and tracking; dropping closes the client
                return Err(FsiddError::ServerClosed);
            }

            tokio::spawn(connection.serve());
        }
    }

    /// Returns the number of connections currently being served.
    pub fn connection_count(&self) -> usize {
        self.tracker.len()
    }

    /// Stops accepting clients and lets every live connection finish its current request.
    ///
    /// Waits until all connections are gone or `timeout` elapses. Connections still open at
    /// the deadline are left running; call [`close`](Self::close) to terminate them. The
    /// returned error merges failures to close the listener and the connections.
    pub async fn shutdown(&self, timeout: Duration) -> FsiddResult<()> {
        let errors = self.stop(false).await;

        let drained = tokio::time::timeout(timeout, self.tracker.wait_until(TrackerState::is_empty));
        if drained.await.is_err() {
            tracing::warn!(
                remaining = self.tracker.len(),
                "shutdown timed out with connections still open"
            );
        }

        FsiddError::merge(errors)
    }

    /// Stops accepting clients and terminates every live connection, cancelling requests in
    /// progress.
    pub async fn close(&self) -> FsiddResult<()> {
        FsiddError::merge(self.stop(true).await)
    }

    async fn stop(&self, force: bool) -> Vec<FsiddError> {
        let mut errors = Vec::new();

        self.tracker.begin_shutdown();
        self.stop.cancel();
        if let Err(e) = self.listener.close() {
            errors.push(e.into());
        }

        // The accept loop may be between accepting and tracking a client; wait for it to exit
        // so that no connection is added after the snapshot below.
        self.tracker.wait_until(|state| !state.listening).await;

        for connection in self.tracker.snapshot() {
            let result = if force {
                connection.close()
            } else {
                connection.shutdown()
            };

            if let Err(e) = result {
                errors.push(e.into());
            }
        }

        errors
    }
}

impl Tracker {
    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start_listening(&self) -> bool {
        let mut state = self.lock();
        if state.in_shutdown {
            return false;
        }

        state.listening = true;
        true
    }

    fn stop_listening(&self) {
        self.lock().listening = false;
        self.changed.notify_waiters();
    }

    fn begin_shutdown(&self) {
        self.lock().in_shutdown = true;
        self.changed.notify_waiters();
    }

    /// Adds a connection, unless shutdown has already begun.
    pub(crate) fn track(&self, connection: Arc<Connection>) -> bool {
        let mut state = self.lock();
        if state.in_shutdown {
            return false;
        }

        state.connections.insert(connection.id(), connection);
        true
    }

    pub(crate) fn untrack(&self, id: u64) {
        self.lock().connections.remove(&id);
        self.changed.notify_waiters();
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().connections.len()
    }

    fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.lock().connections.values().cloned().collect()
    }

    /// Waits until `condition` holds for the tracked state.
    pub(crate) async fn wait_until(&self, condition: impl Fn(&TrackerState) -> bool) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);

            // registered before checking, so a change between the check and the await is seen
            notified.as_mut().enable();

            if condition(&*self.lock()) {
                return;
            }

            notified.await;
        }
    }
}

impl<'a> ListeningGuard<'a> {
    fn start(tracker: &'a Tracker) -> Option<Self> {
        tracker.start_listening().then_some(Self(tracker))
    }
}

impl TrackerState {
    pub(crate) fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Drop for ListeningGuard<'_> {
    fn drop(&mut self) {
        self.0.stop_listening();
    }
}

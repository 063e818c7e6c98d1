use std::{
    collections::HashMap,
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use nix::sys::socket::Shutdown;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{error::is_closed_io, FsiddError, FsiddResult};

use super::{server::Tracker, Handler, SeqpacketStream, PACKET_MAX_LENGTH};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// One accepted client.
///
/// Requests are handled strictly one after another. The connection moves from active to
/// shutting down when its read half is closed, and is closed once the loop exits.
pub(crate) struct Connection {
    id: u64,
    stream: SeqpacketStream,
    handlers: Arc<HashMap<String, Handler>>,
    tracker: Arc<Tracker>,
    in_shutdown: AtomicBool,
    cancel: CancellationToken,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Connection {
    pub(crate) fn new(
        id: u64,
        stream: SeqpacketStream,
        handlers: Arc<HashMap<String, Handler>>,
        tracker: Arc<Tracker>,
    ) -> Self {
        Self {
            id,
            stream,
            handlers,
            tracker,
            in_shutdown: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Serves requests until the peer hangs up, the connection is shut down, or an
    /// unrecoverable error occurs. The connection removes itself from the tracker on exit.
    pub(crate) async fn serve(self: Arc<Self>) {
        let span = tracing::debug_span!("connection", id = self.id);
        async {
            tracing::debug!("received connection");

            self.run().await;

            if let Err(e) = self.close() {
                if !is_closed_io(&e) {
                    tracing::warn!("{e}");
                }
            }
            self.tracker.untrack(self.id);

            tracing::debug!("connection closed");
        }
        .instrument(span)
        .await
    }

    async fn run(&self) {
        // One byte more than the largest request, so a longer message shows up as an
        // over-long read instead of silently fitting the buffer.
        let mut buf = vec![0u8; PACKET_MAX_LENGTH + 1];

        // A request may already be queued when shutdown starts, so the flag is checked before
        // every read and not only when the read returns.
        while !self.in_shutdown.load(Ordering::SeqCst) {
            let n = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                result = self.stream.recv(&mut buf) => match result {
                    Ok(0) => {
                        tracing::debug!("received EOF");
                        return;
                    }
                    Ok(n) => n,
                    Err(e) if is_closed_io(&e) => {
                        tracing::debug!("received EOF");
                        return;
                    }
                    Err(e) => {
                        tracing::error!("read error: {e}");
                        return;
                    }
                },
            };

            if n > PACKET_MAX_LENGTH {
                tracing::warn!("message truncated, ignoring");
                if let Err(e) = self.write_error("message truncated").await {
                    tracing::error!("error writing response: {e}");
                    return;
                }
                continue;
            }

            let Ok(line) = std::str::from_utf8(&buf[..n]) else {
                tracing::warn!("request is not valid UTF-8, ignoring");
                if let Err(e) = self.write_error(&FsiddError::InvalidArgument.to_string()).await {
                    tracing::error!("error writing response: {e}");
                    return;
                }
                continue;
            };
            tracing::debug!("=> {line:?}");

            let (cmd, arg) = line.split_once(' ').unwrap_or((line, ""));
            let cmd = cmd.to_uppercase();

            if let Err(e) = self.execute(&cmd, arg).await {
                tracing::error!("error executing command: {e}");
                return;
            }
        }
    }

    async fn execute(&self, cmd: &str, arg: &str) -> FsiddResult<()> {
        let Some(handler) = self.handlers.get(cmd) else {
            return self.write_error(&format!("unknown command {cmd:?}")).await;
        };

        match handler(self.cancel.clone(), arg.to_string()).await {
            Ok(response) => self.write(&format!("+ {response}")).await,
            Err(e) => self.write_error(&e.to_string()).await,
        }
    }

    async fn write_error(&self, message: &str) -> FsiddResult<()> {
        self.write(&format!("- {message}")).await
    }

    async fn write(&self, message: &str) -> FsiddResult<()> {
        tracing::debug!("<= {message:?}");

        let bytes = message.as_bytes();
        let written = tokio::select! {
            biased;
            result = self.stream.send(bytes) => result?,
            _ = self.cancel.cancelled() => return Err(FsiddError::Cancelled),
        };

        if written < bytes.len() {
            return Err(FsiddError::ShortWrite);
        }

        Ok(())
    }

    /// Stops reading further requests. A request in progress still completes and its response
    /// is written.
    pub(crate) fn shutdown(&self) -> io::Result<()> {
        tracing::debug!(id = self.id, "shutdown");
        self.in_shutdown.store(true, Ordering::SeqCst);
        self.stream.shutdown(Shutdown::Read)
    }

    /// Stops reading and cancels the request in progress, if any.
    pub(crate) fn close(&self) -> io::Result<()> {
        tracing::debug!(id = self.id, "close");
        self.in_shutdown.store(true, Ordering::SeqCst);
        let result = self.stream.shutdown(Shutdown::Read);
        self.cancel.cancel();
        result
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

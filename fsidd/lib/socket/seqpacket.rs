use std::{
    io,
    os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
    path::{Path, PathBuf},
    sync::Mutex,
    time::Duration,
};

use nix::{
    errno::Errno,
    fcntl::{fcntl, FcntlArg, OFlag},
    sys::socket::{
        self, AddressFamily, Backlog, MsgFlags, Shutdown, SockFlag, SockType, UnixAddr,
    },
};
use tokio::io::{unix::AsyncFd, Interest};

use crate::FsiddResult;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The accept backlog of a bound listener.
const LISTEN_BACKLOG: i32 = 128;

/// How many times a connect is retried while the listener's backlog is full.
const CONNECT_ATTEMPTS: u32 = 100;

/// The pause between connect attempts.
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(10);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A listening Unix `SOCK_SEQPACKET` socket.
///
/// A listener created with [`bind`](Self::bind) owns its socket file and removes it when
/// dropped. One adopted with [`from_fd`](Self::from_fd) leaves the filesystem alone.
#[derive(Debug)]
pub struct SeqpacketListener {
    fd: AsyncFd<OwnedFd>,
    path: Mutex<Option<PathBuf>>,
}

/// A connected Unix `SOCK_SEQPACKET` socket.
///
/// Each `send` is delivered as one message and each `recv` returns at most one message, so
/// message boundaries are the request framing.
#[derive(Debug)]
pub struct SeqpacketStream {
    fd: AsyncFd<OwnedFd>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SeqpacketListener {
    /// Binds a new listener at `path`.
    ///
    /// A socket file left behind by a previous run is removed first. Anything else at `path`
    /// makes the bind fail.
    pub fn bind(path: impl AsRef<Path>) -> FsiddResult<Self> {
        let path = path.as_ref();
        remove_stale_socket(path)?;

        let fd = socket::socket(
            AddressFamily::Unix,
            SockType::SeqPacket,
            SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
            None,
        )?;
        socket::bind(fd.as_raw_fd(), &UnixAddr::new(path)?)?;
        socket::listen(&fd, Backlog::new(LISTEN_BACKLOG)?)?;

        tracing::debug!(path = %path.display(), "listening");

        Ok(Self {
            fd: AsyncFd::with_interest(fd, Interest::READABLE)?,
            path: Mutex::new(Some(path.to_path_buf())),
        })
    }

    /// Adopts an already listening socket, such as one passed in by the service manager.
    pub fn from_fd(fd: OwnedFd) -> FsiddResult<Self> {
        set_nonblocking(fd.as_raw_fd())?;

        Ok(Self {
            fd: AsyncFd::with_interest(fd, Interest::READABLE)?,
            path: Mutex::new(None),
        })
    }

    /// Waits for the next connection.
    pub async fn accept(&self) -> io::Result<SeqpacketStream> {
        loop {
            let mut guard = self.fd.readable().await?;
            let result = guard.try_io(|fd| {
                socket::accept4(
                    fd.as_raw_fd(),
                    SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
                )
                .map_err(io::Error::from)
            });

            match result {
                Ok(Ok(raw)) => {
                    // SAFETY: accept4 returned a fresh descriptor that nothing else owns.
                    let fd = unsafe { OwnedFd::from_raw_fd(raw) };
                    return SeqpacketStream::from_owned(fd);
                }
                Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
    }

    /// Returns the socket file this listener owns, if any.
    pub fn local_path(&self) -> Option<PathBuf> {
        self.path.lock().ok().and_then(|path| path.clone())
    }

    /// Removes the socket file so no new clients can find the listener.
    ///
    /// Calling this more than once is harmless.
    pub fn unlink(&self) -> io::Result<()> {
        let path = match self.path.lock() {
            Ok(mut path) => path.take(),
            Err(_) => None,
        };

        match path {
            Some(path) => match std::fs::remove_file(&path) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            },
            None => Ok(()),
        }
    }

    /// Removes the socket file and stops the kernel from queueing further connections.
    ///
    /// The descriptor itself is released when the listener is dropped.
    pub fn close(&self) -> io::Result<()> {
        let unlinked = self.unlink();
        match socket::shutdown(self.fd.as_raw_fd(), Shutdown::Both) {
            Ok(()) | Err(Errno::ENOTCONN) => unlinked,
            Err(e) => unlinked.and(Err(e.into())),
        }
    }
}

impl SeqpacketStream {
    /// Connects to the listener at `path`.
    pub async fn connect(path: impl AsRef<Path>) -> FsiddResult<Self> {
        let addr = UnixAddr::new(path.as_ref())?;
        let fd = socket::socket(
            AddressFamily::Unix,
            SockType::SeqPacket,
            SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
            None,
        )?;

        let mut attempts = 0;
        loop {
            match socket::connect(fd.as_raw_fd(), &addr) {
                Ok(()) => break,
                Err(Errno::EAGAIN) if attempts < CONNECT_ATTEMPTS => {
                    attempts += 1;
                    tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(Self::from_owned(fd)?)
    }

    /// Creates a connected pair of streams.
    pub fn pair() -> FsiddResult<(Self, Self)> {
        let (a, b) = socket::socketpair(
            AddressFamily::Unix,
            SockType::SeqPacket,
            None,
            SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
        )?;

        Ok((Self::from_owned(a)?, Self::from_owned(b)?))
    }

    fn from_owned(fd: OwnedFd) -> io::Result<Self> {
        Ok(Self {
            fd: AsyncFd::new(fd)?,
        })
    }

    /// Receives one message into `buf`.
    ///
    /// Returns the number of bytes read, `0` once the peer has hung up or the read half was
    /// shut down. A message longer than `buf` is truncated and the rest of it is discarded.
    pub async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|fd| {
                socket::recv(fd.as_raw_fd(), buf, MsgFlags::empty()).map_err(io::Error::from)
            }) {
                Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    /// Sends `buf` as one message, returning the number of bytes written.
    pub async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.fd.writable().await?;
            match guard.try_io(|fd| {
                socket::send(fd.as_raw_fd(), buf, MsgFlags::MSG_NOSIGNAL).map_err(io::Error::from)
            }) {
                Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    /// Shuts down one or both halves of the connection.
    ///
    /// Shutting down a socket whose peer is already gone is not an error.
    pub fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        match socket::shutdown(self.fd.as_raw_fd(), how) {
            Ok(()) | Err(Errno::ENOTCONN) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn remove_stale_socket(path: &Path) -> FsiddResult<()> {
    use std::os::unix::fs::FileTypeExt;

    match std::fs::symlink_metadata(path) {
        Ok(metadata) if metadata.file_type().is_socket() => {
            tracing::debug!(path = %path.display(), "removing stale socket");
            std::fs::remove_file(path)?;
            Ok(())
        }
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} exists and is not a socket", path.display()),
        )
        .into()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn set_nonblocking(fd: RawFd) -> FsiddResult<()> {
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Drop for SeqpacketListener {
    fn drop(&mut self) {
        if let Err(e) = self.unlink() {
            tracing::warn!("failed to remove socket file: {e}");
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

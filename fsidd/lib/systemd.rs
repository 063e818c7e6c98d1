//! Service manager integration: socket activation and readiness notification.
//!
//! Both follow the `sd_listen_fds(3)` and `sd_notify(3)` environment conventions, so they also
//! work under other supervisors that speak them. Outside a service manager they do nothing.

use std::{
    env,
    os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
};

use nix::{
    fcntl::{fcntl, FcntlArg, FdFlag},
    sys::socket::{self, AddressFamily, MsgFlags, SockFlag, SockType, UnixAddr},
};

use crate::FsiddResult;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The first descriptor passed by the service manager.
pub const LISTEN_FDS_START: RawFd = 3;

/// Sent once the daemon accepts requests.
pub const READY: &str = "READY=1";

/// Sent when the daemon begins shutting down.
pub const STOPPING: &str = "STOPPING=1";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Takes the listening socket passed in by the service manager, if there is one.
///
/// The activation variables are removed from the environment so child processes do not
/// pick them up.
pub fn listen_fds() -> FsiddResult<Option<OwnedFd>> {
    let fd = activated_fd(std::process::id(), |key| env::var(key).ok());
    env::remove_var("LISTEN_PID");
    env::remove_var("LISTEN_FDS");
    env::remove_var("LISTEN_FDNAMES");

    let Some(fd) = fd else {
        return Ok(None);
    };

    fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    tracing::debug!(fd, "using socket passed by the service manager");

    // SAFETY: the service manager hands ownership of the descriptor to this process.
    Ok(Some(unsafe { OwnedFd::from_raw_fd(fd) }))
}

/// Returns the passed descriptor described by the activation variables, if they are meant for
/// the process `pid`.
pub fn activated_fd(pid: u32, lookup: impl Fn(&str) -> Option<String>) -> Option<RawFd> {
    let listen_pid: u32 = lookup("LISTEN_PID")?.trim().parse().ok()?;
    if listen_pid != pid {
        return None;
    }

    let listen_fds: u32 = lookup("LISTEN_FDS")?.trim().parse().ok()?;
    if listen_fds < 1 {
        return None;
    }
    if listen_fds > 1 {
        tracing::warn!(listen_fds, "more than one socket passed, using the first");
    }

    Some(LISTEN_FDS_START)
}

/// Sends `state` to the service manager if `NOTIFY_SOCKET` is set.
///
/// Failures are logged and otherwise ignored.
pub fn notify(state: &str) {
    let Ok(path) = env::var("NOTIFY_SOCKET") else {
        return;
    };

    if let Err(e) = notify_to(&path, state) {
        tracing::warn!("failed to notify service manager: {e}");
    }
}

/// Sends `state` as one datagram to the notification socket at `path`.
///
/// A leading `@` selects the abstract socket namespace.
pub fn notify_to(path: &str, state: &str) -> FsiddResult<()> {
    let addr = match path.strip_prefix('@') {
        Some(name) => UnixAddr::new_abstract(name.as_bytes())?,
        None => UnixAddr::new(path)?,
    };

    let fd = socket::socket(
        AddressFamily::Unix,
        SockType::Datagram,
        SockFlag::SOCK_CLOEXEC,
        None,
    )?;
    socket::sendto(fd.as_raw_fd(), state.as_bytes(), &addr, MsgFlags::empty())?;

    tracing::debug!(state, "notified service manager");
    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, os::unix::net::UnixDatagram};

    use tempfile::tempdir;

    use super::*;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_activated_fd() {
        let vars = env(&[("LISTEN_PID", "42"), ("LISTEN_FDS", "1")]);
        assert_eq!(activated_fd(42, &vars), Some(3));
        assert_eq!(activated_fd(43, &vars), None);

        assert_eq!(
            activated_fd(42, env(&[("LISTEN_PID", "42"), ("LISTEN_FDS", "0")])),
            None
        );
        assert_eq!(activated_fd(42, env(&[("LISTEN_FDS", "1")])), None);
        assert_eq!(
            activated_fd(42, env(&[("LISTEN_PID", "x"), ("LISTEN_FDS", "1")])),
            None
        );
    }

    #[test]
    fn test_notify_to_socket_path() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let path = temp_dir.path().join("notify.sock");
        let receiver = UnixDatagram::bind(&path)?;

        notify_to(&path.display().to_string(), READY)?;

        let mut buf = [0u8; 32];
        let n = receiver.recv(&mut buf)?;
        assert_eq!(&buf[..n], READY.as_bytes());

        Ok(())
    }
}

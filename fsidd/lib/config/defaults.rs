use std::time::Duration;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The socket the daemon listens on unless configured otherwise.
pub const DEFAULT_SOCKET_PATH: &str = "/run/fsidd.sock";

/// The config file read when none is given on the command line.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/knfsd-fsidd.toml";

/// The size of the database connection pool.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// How long a graceful shutdown waits for connections to finish before closing them.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

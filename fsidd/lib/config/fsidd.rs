use std::{
    io,
    path::{Path, PathBuf},
};

use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{cli::FsiddArgs, FsiddError, FsiddResult};

use super::{DEFAULT_CONFIG_PATH, DEFAULT_MAX_CONNECTIONS, DEFAULT_SOCKET_PATH};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const ENV_SOCKET: &str = "FSID_SOCKET";
const ENV_DATABASE_URL: &str = "FSID_DATABASE_URL";
const ENV_TABLE_NAME: &str = "FSID_TABLE_NAME";
const ENV_CREATE_TABLE: &str = "FSID_CREATE_TABLE";
const ENV_DEBUG: &str = "FSID_DEBUG";
const ENV_CACHE: &str = "FSID_CACHE";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The daemon configuration.
///
/// ```toml
/// socket = "/run/fsidd.sock"
/// debug = false
/// cache = true
///
/// [database]
/// url = "/var/lib/fsidd/fsids.db"
/// table-name = "fsids"
/// create-table = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder, Getters, CopyGetters)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    /// The socket to listen on.
    #[serde(default = "Config::default_socket")]
    #[builder(default = Config::default_socket(), setter(into))]
    #[getset(get = "pub with_prefix")]
    pub(super) socket: PathBuf,

    /// Whether debug logging is enabled.
    #[serde(default)]
    #[builder(default)]
    #[getset(get_copy = "pub with_prefix")]
    pub(super) debug: bool,

    /// Whether resolved fsids are cached in memory.
    #[serde(default = "Config::default_cache")]
    #[builder(default = Config::default_cache())]
    #[getset(get_copy = "pub with_prefix")]
    pub(super) cache: bool,

    /// Whether fsids are kept in process memory instead of a database.
    #[serde(default)]
    #[builder(default)]
    #[getset(get_copy = "pub with_prefix")]
    pub(super) memory: bool,

    /// The database holding the fsid table.
    #[serde(default)]
    #[builder(default)]
    #[getset(get = "pub with_prefix")]
    pub(super) database: DatabaseConfig,
}

/// Where fsids are stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder, Getters, CopyGetters)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DatabaseConfig {
    /// The database URL, or a path to an SQLite file.
    #[serde(default)]
    #[builder(default, setter(into))]
    #[getset(get = "pub with_prefix")]
    pub(super) url: String,

    /// The name of the fsid table.
    #[serde(default)]
    #[builder(default, setter(into))]
    #[getset(get = "pub with_prefix")]
    pub(super) table_name: String,

    /// Whether to create the fsid table on startup.
    #[serde(default)]
    #[builder(default)]
    #[getset(get_copy = "pub with_prefix")]
    pub(super) create_table: bool,

    /// The size of the connection pool.
    #[serde(default = "DatabaseConfig::default_max_connections")]
    #[builder(default = DatabaseConfig::default_max_connections())]
    #[getset(get_copy = "pub with_prefix")]
    pub(super) max_connections: u32,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Config {
    /// Builds the effective configuration for the daemon from all layers and validates it.
    pub fn resolve(args: &FsiddArgs) -> FsiddResult<Self> {
        let mut config = Self::load(args.config.as_deref())?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.apply_args(args);
        config.validate()?;

        Ok(config)
    }

    /// Reads the config file at `path`, or the default config file if `path` is `None`.
    ///
    /// A missing default config file yields the built-in defaults. A missing file that was
    /// asked for explicitly is an error.
    pub fn load(path: Option<&Path>) -> FsiddResult<Self> {
        let (path, explicit) = match path {
            Some(path) => (path, true),
            None => (Path::new(DEFAULT_CONFIG_PATH), false),
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::debug!(path = %path.display(), "loaded config file");
                Self::from_toml(&contents)
            }
            Err(e) if !explicit && e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Parses a TOML config document.
    pub fn from_toml(contents: &str) -> FsiddResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Overrides settings from `FSID_*` variables looked up through `lookup`.
    ///
    /// Unset and empty variables are ignored. Every malformed boolean is reported.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> FsiddResult<()> {
        let lookup = |key: &str| lookup(key).filter(|value| !value.is_empty());
        let mut errors = Vec::new();

        if let Some(socket) = lookup(ENV_SOCKET) {
            self.socket = PathBuf::from(socket);
        }
        if let Some(url) = lookup(ENV_DATABASE_URL) {
            self.database.url = url;
        }
        if let Some(table_name) = lookup(ENV_TABLE_NAME) {
            self.database.table_name = table_name;
        }

        let flags = [
            (ENV_CREATE_TABLE, &mut self.database.create_table),
            (ENV_DEBUG, &mut self.debug),
            (ENV_CACHE, &mut self.cache),
        ];
        for (key, flag) in flags {
            if let Some(value) = lookup(key) {
                match parse_bool(&value) {
                    Some(parsed) => *flag = parsed,
                    None => errors.push(format!("invalid argument {value:?} for {key:?}")),
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(FsiddError::InvalidConfig(errors))
        }
    }

    /// Overrides settings from command line flags.
    pub fn apply_args(&mut self, args: &FsiddArgs) {
        if let Some(socket) = &args.socket {
            self.socket = socket.clone();
        }
        if let Some(url) = &args.database_url {
            self.database.url = url.clone();
        }
        if let Some(table_name) = &args.table_name {
            self.database.table_name = table_name.clone();
        }
        if args.create_table {
            self.database.create_table = true;
        }
        if args.memory {
            self.memory = true;
        }
        if args.no_cache {
            self.cache = false;
        }
        if args.debug {
            self.debug = true;
        }
    }

    fn default_socket() -> PathBuf {
        PathBuf::from(DEFAULT_SOCKET_PATH)
    }

    fn default_cache() -> bool {
        true
    }
}

impl DatabaseConfig {
    fn default_max_connections() -> u32 {
        DEFAULT_MAX_CONNECTIONS
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "y" | "yes" | "on" => Some(true),
        "0" | "f" | "false" | "n" | "no" | "off" => Some(false),
        _ => None,
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

use std::path::PathBuf;

use clap::Parser;

use crate::cli::styles;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// fsidd - Allocates and resolves stable fsids for NFS re-exported paths
///
/// Flags override environment variables, which override the config file.
#[derive(Debug, Default, Parser)]
#[command(name = "fsidd", author, about, version, styles=styles::styles())]
pub struct FsiddArgs {
    /// Path to the config file [default: /etc/knfsd-fsidd.toml]
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Path of the socket to listen on
    #[arg(long, value_name = "PATH")]
    pub socket: Option<PathBuf>,

    /// Database URL or SQLite file path
    #[arg(long, value_name = "URL")]
    pub database_url: Option<String>,

    /// Name of the fsid table
    #[arg(long, value_name = "NAME")]
    pub table_name: Option<String>,

    /// Create the fsid table on startup if it does not exist
    #[arg(long)]
    pub create_table: bool,

    /// Keep fsids in process memory instead of a database
    #[arg(long)]
    pub memory: bool,

    /// Send every lookup to the store
    #[arg(long)]
    pub no_cache: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

use std::path::PathBuf;

use clap::Parser;

use crate::{cli::styles, config::DEFAULT_SOCKET_PATH};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// fsidctl - Sends a single request to a running fsidd
#[derive(Debug, Parser)]
#[command(name = "fsidctl", author, about, version, styles=styles::styles())]
pub struct FsidctlArgs {
    /// Path of the daemon's socket
    #[arg(short, long, value_name = "PATH", default_value = DEFAULT_SOCKET_PATH)]
    pub socket: PathBuf,

    /// The verb to send, e.g. `get_or_create_fsidnum`
    #[arg(value_name = "VERB")]
    pub command: String,

    /// The argument of the verb
    #[arg(value_name = "ARG")]
    pub argument: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FsidctlArgs {
    /// Returns the request line to send.
    pub fn request_line(&self) -> String {
        match &self.argument {
            Some(argument) => format!("{} {}", self.command, argument),
            None => self.command.clone(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

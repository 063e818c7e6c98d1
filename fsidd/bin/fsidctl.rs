//! `fsidctl` sends one request to a running `fsidd` and prints the answer.
//!
//! ```bash
//! fsidctl get_or_create_fsidnum /srv/export/a
//! fsidctl --socket=/tmp/fsidd.sock get_path 1
//! ```
//!
//! Exits with status 1 if the daemon answers with an error.

use clap::Parser;
use fsidd::{
    cli::{AnsiStyles, FsidctlArgs},
    socket::{Client, Response},
};

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = FsidctlArgs::parse();

    let mut client = Client::connect(&args.socket).await?;
    match client.request(&args.request_line()).await? {
        Response::Ok(value) => {
            println!("{value}");
            Ok(())
        }
        Response::Err(message) => {
            eprintln!("{} {message}", "error:".error());
            std::process::exit(1);
        }
    }
}

//! Daemon configuration.
//!
//! Settings are layered, each layer overriding the one before it: built-in defaults, the TOML
//! config file, `FSID_*` environment variables, then command line flags.

mod defaults;
mod fsidd;
mod validate;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use defaults::*;
pub use fsidd::*;

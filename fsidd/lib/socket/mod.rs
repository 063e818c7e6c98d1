//! The local socket the daemon is reached through.
//!
//! Requests and responses are single `SOCK_SEQPACKET` messages, so no extra framing is needed.
//! A request is a verb optionally followed by a space and one argument. A response starts with
//! `+ ` on success or `- ` on failure, followed by the result or the error message.

mod client;
mod connection;
mod handler;
mod seqpacket;
mod server;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use client::*;
pub use handler::*;
pub use seqpacket::*;
pub use server::*;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The largest request the server accepts, in bytes.
///
/// A request carries at most one path, so twice `PATH_MAX` leaves room for the verb.
pub const PACKET_MAX_LENGTH: usize = 2 * libc::PATH_MAX as usize;

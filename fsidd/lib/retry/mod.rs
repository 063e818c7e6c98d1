//! Retry with jittered exponential backoff for store operations.
//!
//! Transient store failures (connection loss, serialization failures, uniqueness conflicts
//! from a lost allocation race) are retried until an overall deadline. Permanent failures are
//! returned on the first attempt.

mod backoff;
mod retrier;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use backoff::*;
pub use retrier::*;

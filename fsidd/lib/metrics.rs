//! Per-request outcome recording.
//!
//! Every protocol request gets a [`RequestRecorder`]. The retry loop counts attempts on it and
//! the command layer ends it with an [`Outcome`], which emits one structured `tracing` event
//! carrying the command, outcome, retry count and elapsed time.

use std::{
    fmt,
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use tokio::time::Instant;

use crate::{store::StoreError, FsiddError, FsiddResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// How a request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The request succeeded.
    Ok,

    /// The request succeeded but nothing was found.
    NotFound,

    /// The request was rejected because of a bad argument.
    Invalid,

    /// The request failed.
    Error,

    /// The request was cancelled before it completed.
    Cancelled,
}

/// Records attempts and timing for a single request.
#[derive(Debug)]
pub struct RequestRecorder {
    command: &'static str,
    start: Instant,
    attempts: AtomicU32,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Outcome {
    /// Classifies the result of a command handler.
    ///
    /// An empty success is how lookups report a missing entry.
    pub fn of(result: &FsiddResult<String>) -> Self {
        match result {
            Ok(value) if value.is_empty() => Outcome::NotFound,
            Ok(_) => Outcome::Ok,
            Err(FsiddError::InvalidArgument) => Outcome::Invalid,
            Err(FsiddError::Cancelled) => Outcome::Cancelled,
            Err(FsiddError::Store(StoreError::NotFound)) => Outcome::NotFound,
            Err(_) => Outcome::Error,
        }
    }

    /// Returns the label used in log events.
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Ok => "ok",
            Outcome::NotFound => "not_found",
            Outcome::Invalid => "invalid",
            Outcome::Error => "error",
            Outcome::Cancelled => "cancelled",
        }
    }
}

impl RequestRecorder {
    /// Starts recording a request for `command`.
    pub fn new(command: &'static str) -> Self {
        Self {
            command,
            start: Instant::now(),
            attempts: AtomicU32::new(0),
        }
    }

    /// Returns the command being recorded.
    pub fn command(&self) -> &'static str {
        self.command
    }

    /// Marks the start of a store attempt.
    pub fn start_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of store attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Returns the number of attempts beyond the first.
    pub fn retries(&self) -> u32 {
        self.attempts().saturating_sub(1)
    }

    /// Returns the time elapsed since the request started.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Ends the request and emits the outcome event.
    pub fn end(&self, outcome: Outcome) {
        tracing::debug!(
            command = self.command,
            outcome = %outcome,
            retries = self.retries(),
            duration_ms = self.elapsed().as_millis() as u64,
            "request finished"
        );
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

//! The context a command handler runs in.

use tokio_util::sync::CancellationToken;

use crate::{
    metrics::{Outcome, RequestRecorder},
    FsiddResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Carries the cancellation signal of the owning connection and the recorder of a single request.
#[derive(Debug)]
pub struct RequestContext {
    cancel: CancellationToken,
    recorder: RequestRecorder,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RequestContext {
    /// Creates a context for `command`, cancelled when `cancel` is.
    pub fn new(command: &'static str, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            recorder: RequestRecorder::new(command),
        }
    }

    /// Returns the cancellation token.
    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns `true` once the owning connection has been closed.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns the request recorder.
    pub fn recorder(&self) -> &RequestRecorder {
        &self.recorder
    }

    /// Records the outcome of `result` and hands it back.
    pub fn finish(self, result: FsiddResult<String>) -> FsiddResult<String> {
        self.recorder.end(Outcome::of(&result));
        result
    }
}

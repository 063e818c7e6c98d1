use std::{future::Future, sync::Arc};

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::FsiddResult;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A command handler.
///
/// Receives the cancellation token of the connection the request arrived on and the request
/// argument (everything after the first space, possibly empty). The `Ok` text is sent back
/// after `+ `, the `Display` text of an error after `- `.
pub type Handler =
    Arc<dyn Fn(CancellationToken, String) -> BoxFuture<'static, FsiddResult<String>> + Send + Sync>;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Boxes an async function into a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(CancellationToken, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FsiddResult<String>> + Send + 'static,
{
    Arc::new(move |cancel, arg| Box::pin(f(cancel, arg)))
}

//! The protocol verbs and their handlers.
//!
//! | Verb | Argument | Result |
//! |------|----------|--------|
//! | `get_fsidnum` | path | fsid, or empty if the path has none |
//! | `get_or_create_fsidnum` | path | fsid, allocated if needed |
//! | `get_path` | fsid | path, or empty if the fsid was never issued |
//! | `version` | | the protocol version |

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    cache::FsidCache, context::RequestContext, socket::Server, store::FsidSource, FsiddError,
    FsiddResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Looks up the fsid of a path.
pub const GET_FSIDNUM: &str = "GET_FSIDNUM";

/// Looks up the fsid of a path, allocating one if needed.
pub const GET_OR_CREATE_FSIDNUM: &str = "GET_OR_CREATE_FSIDNUM";

/// Looks up the path of an fsid.
pub const GET_PATH: &str = "GET_PATH";

/// Reports the protocol version.
pub const VERSION: &str = "VERSION";

/// The protocol version reported by `version`.
pub const PROTOCOL_VERSION: &str = "1";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Registers the four protocol verbs on `server`, all served from `cache`.
pub fn register_commands<S>(server: &mut Server, cache: Arc<FsidCache<S>>)
where
    S: FsidSource + 'static,
{
    let c = cache.clone();
    server.handle(GET_FSIDNUM, move |cancel: CancellationToken, arg: String| {
        let cache = c.clone();
        async move {
            let ctx = RequestContext::new(GET_FSIDNUM, cancel);
            let result = get_fsidnum(&cache, &ctx, &arg).await;
            ctx.finish(result)
        }
    });

    let c = cache.clone();
    server.handle(
        GET_OR_CREATE_FSIDNUM,
        move |cancel: CancellationToken, arg: String| {
            let cache = c.clone();
            async move {
                let ctx = RequestContext::new(GET_OR_CREATE_FSIDNUM, cancel);
                let result = get_or_create_fsidnum(&cache, &ctx, &arg).await;
                ctx.finish(result)
            }
        },
    );

    server.handle(GET_PATH, move |cancel: CancellationToken, arg: String| {
        let cache = cache.clone();
        async move {
            let ctx = RequestContext::new(GET_PATH, cancel);
            let result = get_path(&cache, &ctx, &arg).await;
            ctx.finish(result)
        }
    });

    server.handle(VERSION, |_, _| async { version() });
}

/// Returns the fsid of `path`, or an empty string if the path has none.
pub async fn get_fsidnum<S: FsidSource>(
    cache: &FsidCache<S>,
    ctx: &RequestContext,
    path: &str,
) -> FsiddResult<String> {
    if path.is_empty() {
        return Err(FsiddError::InvalidArgument);
    }

    let fsid = cache.get_fsid(ctx, path).await?;
    Ok(fsid.map(|fsid| fsid.to_string()).unwrap_or_default())
}

/// Returns the fsid of `path`, allocating one if the path has none.
pub async fn get_or_create_fsidnum<S: FsidSource>(
    cache: &FsidCache<S>,
    ctx: &RequestContext,
    path: &str,
) -> FsiddResult<String> {
    if path.is_empty() {
        return Err(FsiddError::InvalidArgument);
    }

    let fsid = cache.get_or_allocate_fsid(ctx, path).await?;
    Ok(fsid.to_string())
}

/// Returns the path `arg` was allocated to, or an empty string if the fsid was never issued.
///
/// `arg` must be a decimal fsid of at least 1.
pub async fn get_path<S: FsidSource>(
    cache: &FsidCache<S>,
    ctx: &RequestContext,
    arg: &str,
) -> FsiddResult<String> {
    let fsid = parse_fsid(arg)?;
    let path = cache.get_path(ctx, fsid).await?;
    Ok(path.unwrap_or_default())
}

/// Returns the protocol version.
pub fn version() -> FsiddResult<String> {
    Ok(PROTOCOL_VERSION.to_string())
}

fn parse_fsid(arg: &str) -> FsiddResult<i32> {
    match arg.parse::<i32>() {
        Ok(fsid) if fsid >= 1 => Ok(fsid),
        _ => Err(FsiddError::InvalidArgument),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

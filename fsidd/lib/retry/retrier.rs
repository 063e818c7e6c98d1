use std::future::Future;

use tokio::time::Instant;

use crate::{context::RequestContext, store::Retryable, FsiddError, FsiddResult};

use super::RetryPolicy;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Runs store operations under a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct Retrier {
    policy: RetryPolicy,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Retrier {
    /// Creates a retrier with the given policy.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Returns the retry policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `op` until it succeeds, fails permanently, or the retry budget runs out.
    ///
    /// Every invocation of `op` is counted as an attempt on the request recorder. A retryable
    /// failure is followed by a jittered pause; if that pause would end at or past the deadline,
    /// the last failure is returned instead. Cancelling the request's token interrupts the pause
    /// with [`FsiddError::Cancelled`].
    pub async fn run<T, E, F, Fut>(&self, ctx: &RequestContext, mut op: F) -> FsiddResult<T>
    where
        E: Retryable + Into<FsiddError>,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let deadline = Instant::now() + self.policy.get_deadline();
        let mut backoff = self.policy.backoff();

        loop {
            ctx.recorder().start_attempt();

            let error = match op().await {
                Ok(value) => return Ok(value),
                Err(error) if !error.is_retryable() => return Err(error.into()),
                Err(error) => error.into(),
            };

            let pause = backoff.pause();
            if Instant::now() + pause >= deadline {
                tracing::warn!(
                    command = ctx.recorder().command(),
                    attempts = ctx.recorder().attempts(),
                    "retry deadline exceeded: {error}"
                );
                return Err(error);
            }

            tracing::debug!(
                command = ctx.recorder().command(),
                attempt = ctx.recorder().attempts(),
                ?pause,
                "retrying after error: {error}"
            );

            if ctx.is_cancelled() {
                return Err(FsiddError::Cancelled);
            }

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = ctx.cancel().cancelled() => return Err(FsiddError::Cancelled),
            }
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicU32, Ordering},
            Arc,
        },
        time::Duration,
    };

    use tokio_util::sync::CancellationToken;

    use crate::store::StoreError;

    use super::*;

    fn context() -> RequestContext {
        RequestContext::new("TEST", CancellationToken::new())
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_retrier_recovers_from_transient_errors() -> anyhow::Result<()> {
        let retrier = Retrier::default();
        let ctx = context();
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let value = retrier
            .run(&ctx, || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(StoreError::Unavailable("connection refused".into()))
                } else {
                    Ok(7)
                }
            })
            .await?;

        assert_eq!(value, 7);
        assert_eq!(ctx.recorder().attempts(), 4);
        assert_eq!(ctx.recorder().retries(), 3);

        Ok(())
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_retrier_surfaces_permanent_errors() {
        let retrier = Retrier::default();
        let ctx = context();

        let result: FsiddResult<i32> = retrier
            .run(&ctx, || async { Err(StoreError::NotFound) })
            .await;

        assert!(matches!(result, Err(FsiddError::Store(StoreError::NotFound))));
        assert_eq!(ctx.recorder().attempts(), 1);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_retrier_gives_up_at_deadline() {
        let policy = RetryPolicy::builder()
            .deadline(Duration::from_secs(2))
            .initial(Duration::from_millis(100))
            .max(Duration::from_millis(400))
            .build();
        let retrier = Retrier::new(policy);
        let ctx = context();
        let start = Instant::now();

        let result: FsiddResult<()> = retrier
            .run(&ctx, || async {
                Err(StoreError::Unavailable("too many connections".into()))
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "store unavailable: too many connections");
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(ctx.recorder().attempts() > 1);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_retrier_cancelled_during_pause() {
        let policy = RetryPolicy::builder()
            .initial(Duration::from_secs(30))
            .max(Duration::from_secs(30))
            .build();
        let retrier = Retrier::new(policy);
        let cancel = CancellationToken::new();
        let ctx = RequestContext::new("TEST", cancel.clone());
        let calls = Arc::new(AtomicU32::new(0));

        let canceller = {
            let cancel = cancel.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                while calls.load(Ordering::SeqCst) == 0 {
                    tokio::task::yield_now().await;
                }
                cancel.cancel();
            })
        };

        let result: FsiddResult<()> = retrier
            .run(&ctx, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(StoreError::Conflict("/foo".into())) }
            })
            .await;

        canceller.await.unwrap();
        assert!(matches!(result, Err(FsiddError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_retrier_already_cancelled() {
        let retrier = Retrier::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ctx = RequestContext::new("TEST", cancel);

        let result: FsiddResult<()> = retrier
            .run(&ctx, || async {
                Err(StoreError::Unavailable("connection reset".into()))
            })
            .await;

        assert!(matches!(result, Err(FsiddError::Cancelled)));
        assert_eq!(ctx.recorder().attempts(), 1);
    }
}

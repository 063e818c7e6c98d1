use std::time::Duration;

use getset::CopyGetters;
use rand::Rng;
use typed_builder::TypedBuilder;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The overall time budget of a retried operation.
pub const DEFAULT_RETRY_DEADLINE: Duration = Duration::from_secs(5 * 60);

/// The upper bound of the first backoff delay.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(50);

/// The cap on the backoff delay bound.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// The factor the delay bound grows by after each attempt.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Parameters of the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, TypedBuilder, CopyGetters)]
#[getset(get_copy = "pub with_prefix")]
pub struct RetryPolicy {
    /// How long an operation may keep retrying, measured from its first attempt.
    #[builder(default = DEFAULT_RETRY_DEADLINE)]
    deadline: Duration,

    /// The bound of the first delay.
    #[builder(default = DEFAULT_INITIAL_BACKOFF)]
    initial: Duration,

    /// The largest bound any delay may have.
    #[builder(default = DEFAULT_MAX_BACKOFF)]
    max: Duration,

    /// How much the bound grows after each delay.
    #[builder(default = DEFAULT_BACKOFF_MULTIPLIER)]
    multiplier: f64,
}

/// An exponential backoff sequence with full jitter.
///
/// Each delay is drawn uniformly from `[0, bound]`. The bound starts at the initial backoff and
/// is multiplied after every draw, capped at the maximum.
#[derive(Debug, Clone)]
pub struct Backoff {
    bound: Duration,
    max: Duration,
    multiplier: f64,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RetryPolicy {
    /// Starts a fresh backoff sequence for this policy.
    pub fn backoff(&self) -> Backoff {
        Backoff {
            bound: self.initial.min(self.max),
            max: self.max,
            multiplier: self.multiplier.max(1.0),
        }
    }
}

impl Backoff {
    /// Returns the bound the next delay will be drawn under.
    pub fn bound(&self) -> Duration {
        self.bound
    }

    /// Draws the next delay and grows the bound.
    pub fn pause(&mut self) -> Duration {
        let bound_nanos = u64::try_from(self.bound.as_nanos()).unwrap_or(u64::MAX);
        let delay = Duration::from_nanos(rand::rng().random_range(0..=bound_nanos));

        self.bound = self.bound.mul_f64(self.multiplier).min(self.max);

        delay
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.get_deadline(), Duration::from_secs(300));
        assert_eq!(policy.get_initial(), Duration::from_millis(50));
        assert_eq!(policy.get_max(), Duration::from_secs(60));
        assert_eq!(policy.get_multiplier(), 2.0);
    }

    #[test]
    fn test_backoff_bound_grows_and_caps() {
        let policy = RetryPolicy::builder()
            .initial(Duration::from_millis(100))
            .max(Duration::from_millis(500))
            .build();

        let mut backoff = policy.backoff();
        let expected = [100, 200, 400, 500, 500, 500];
        for bound in expected {
            assert_eq!(backoff.bound(), Duration::from_millis(bound));
            let delay = backoff.pause();
            assert!(delay <= Duration::from_millis(bound), "{delay:?} > {bound}ms");
        }
    }

    #[test]
    fn test_zero_initial_backoff() {
        let policy = RetryPolicy::builder().initial(Duration::ZERO).build();
        let mut backoff = policy.backoff();
        assert_eq!(backoff.pause(), Duration::ZERO);
        assert_eq!(backoff.pause(), Duration::ZERO);
    }
}

//! Unbounded exponential backoff with jitter, capped at a configured ceiling.
//!
//! Used by the actor to retry `init_transactions` forever (per spec §4.3/§7: init failure
//! is "retried forever with backoff; never reported to callers directly"). Shaped after
//! the teacher's `client::controller::maybe_retry`, which loops a fallible async closure
//! under a shared backoff policy, classifying errors to decide whether to keep retrying.

use std::time::Duration;

use rand::Rng;

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const BACKOFF_MULTIPLIER: u32 = 2;

/// Backoff policy: doubling delay, capped at `ceiling`, with up to 20% jitter so that many
/// actors retrying in lockstep after a shared outage don't all hammer the broker on the
/// same tick.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub ceiling: Duration,
}

impl BackoffConfig {
    pub fn new(ceiling: Duration) -> Self {
        Self { ceiling }
    }
}

/// Stateful cursor over a [`BackoffConfig`]; call [`Backoff::next_delay`] once per failed
/// attempt to get the delay to sleep before retrying.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            current: INITIAL_BACKOFF,
        }
    }

    /// Returns the delay for the next retry and advances the internal delay for the one
    /// after that.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current.min(self.config.ceiling);
        self.current = (self.current * BACKOFF_MULTIPLIER).min(self.config.ceiling);

        let jitter_frac: f64 = rand::thread_rng().gen_range(0.0..0.2);
        base + base.mul_f64(jitter_frac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_is_monotonically_bounded_by_ceiling() {
        let mut backoff = Backoff::new(BackoffConfig::new(Duration::from_secs(1)));
        let mut previous_base = Duration::ZERO;
        for _ in 0..10 {
            let delay = backoff.next_delay();
            assert!(delay <= Duration::from_secs(1) + Duration::from_millis(200));
            assert!(delay >= previous_base);
            previous_base = delay.min(Duration::from_secs(1));
        }
    }

    #[test]
    fn first_delay_is_close_to_initial_backoff() {
        let mut backoff = Backoff::new(BackoffConfig::new(Duration::from_secs(30)));
        let delay = backoff.next_delay();
        assert!(delay >= INITIAL_BACKOFF);
        assert!(delay <= INITIAL_BACKOFF + INITIAL_BACKOFF.mul_f64(0.2));
    }
}

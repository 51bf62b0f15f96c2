use std::thread;
use std::time::Duration;

use crate::config::{BatchSizing, ResolvedConfig};

/// Blocks the control loop between batches. Swapped out in tests.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

impl<S: Sleeper + ?Sized> Sleeper for &S {
    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            thread::sleep(duration);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDecision {
    /// Pause for the given cooldown, then retry the same batch.
    Retry(Duration),
    /// The configured retry ceiling was hit.
    GiveUp { attempts: u32 },
}

/// Multiplicative decrease on failure, additive increase on success.
#[derive(Debug, Clone)]
pub struct BackoffController {
    batch_size: usize,
    sizing: BatchSizing,
    pacing_delay: Duration,
    rate_limit_delay: Duration,
    max_retries: Option<u32>,
    consecutive_failures: u32,
}

impl BackoffController {
    pub fn new(
        sizing: BatchSizing,
        pacing_delay: Duration,
        rate_limit_delay: Duration,
        max_retries: Option<u32>,
    ) -> Self {
        Self {
            batch_size: sizing.initial.clamp(sizing.min, sizing.max),
            sizing,
            pacing_delay,
            rate_limit_delay,
            max_retries,
            consecutive_failures: 0,
        }
    }

    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self::new(
            config.batch,
            config.pacing_delay,
            config.rate_limit_delay,
            config.max_retries,
        )
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn on_success(&mut self) -> Duration {
        self.consecutive_failures = 0;
        self.batch_size = self
            .batch_size
            .saturating_add(self.sizing.step)
            .min(self.sizing.max);
        self.pacing_delay
    }

    pub fn on_failure(&mut self) -> FailureDecision {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.batch_size = (self.batch_size / 2).max(self.sizing.min);
        match self.max_retries {
            Some(limit) if self.consecutive_failures > limit => FailureDecision::GiveUp {
                attempts: self.consecutive_failures,
            },
            _ => FailureDecision::Retry(self.rate_limit_delay),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizing() -> BatchSizing {
        BatchSizing {
            min: 5,
            max: 50,
            initial: 50,
            step: 5,
        }
    }

    #[test]
    fn halves_down_to_floor() {
        let mut backoff =
            BackoffController::new(sizing(), Duration::ZERO, Duration::from_secs(60), None);
        let sizes: Vec<usize> = (0..5)
            .map(|_| {
                backoff.on_failure();
                backoff.batch_size()
            })
            .collect();
        assert_eq!(sizes, vec![25, 12, 6, 5, 5]);
        assert_eq!(backoff.consecutive_failures(), 5);
    }

    #[test]
    fn success_resets_failures_and_grows() {
        let mut backoff = BackoffController::new(
            BatchSizing {
                initial: 10,
                ..sizing()
            },
            Duration::from_millis(10),
            Duration::from_secs(60),
            None,
        );
        backoff.on_failure();
        assert_eq!(backoff.on_success(), Duration::from_millis(10));
        assert_eq!(backoff.batch_size(), 10);
        assert_eq!(backoff.consecutive_failures(), 0);
    }

    #[test]
    fn gives_up_after_retry_ceiling() {
        let mut backoff =
            BackoffController::new(sizing(), Duration::ZERO, Duration::from_secs(1), Some(2));
        assert_eq!(backoff.on_failure(), FailureDecision::Retry(Duration::from_secs(1)));
        assert_eq!(backoff.on_failure(), FailureDecision::Retry(Duration::from_secs(1)));
        assert_eq!(backoff.on_failure(), FailureDecision::GiveUp { attempts: 3 });
    }
}

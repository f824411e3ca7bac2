//! # Reconnect Backoff
//!
//! Exponential backoff with jitter for the queue consumer and the
//! cancellation subscription. Delays grow from the base to the cap and are
//! jittered into `[delay/2, delay]` so a fleet of reconnecting processes
//! does not hammer a recovering broker in lockstep.

use std::time::Duration;

use crate::config::BackoffConfig;

#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            attempt: 0,
        }
    }

    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(config.base(), config.cap())
    }

    /// Next jittered delay; advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let exponent = self.attempt.min(10);
        self.attempt = self.attempt.saturating_add(1);

        let uncapped = self.base.saturating_mul(1u32 << exponent);
        let capped = uncapped.min(self.cap);

        let millis = capped.as_millis() as u64;
        let jittered = millis / 2 + fastrand::u64(0..=millis / 2);
        Duration::from_millis(jittered.max(1))
    }

    /// Reset after a successful (re)connect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_stay_within_jitter_window() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));

        for expected_cap_secs in [1u64, 2, 4, 8, 16, 30, 30, 30] {
            let delay = backoff.next_delay();
            let cap = Duration::from_secs(expected_cap_secs);
            assert!(delay <= cap, "delay {delay:?} exceeds {cap:?}");
            assert!(
                delay >= cap / 2,
                "delay {delay:?} under jitter floor {:?}",
                cap / 2
            );
        }
    }

    #[test]
    fn reset_returns_to_base() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        for _ in 0..6 {
            backoff.next_delay();
        }

        backoff.reset();
        let delay = backoff.next_delay();
        assert!(delay <= Duration::from_secs(1));
    }

    #[test]
    fn never_returns_zero() {
        let mut backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(1));
        for _ in 0..4 {
            assert!(backoff.next_delay() >= Duration::from_millis(1));
        }
    }
}

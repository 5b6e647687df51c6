//! Time source for polling loops and settle delays
//!
//! Log waits are defined in terms of fixed-interval polling windows, so the
//! clock is injected rather than read directly. Tests swap in a manual clock
//! that advances on `sleep` without actually waiting.

use std::time::{Duration, Instant};

/// Source of "now" plus a way to wait
#[trait_variant::make(Clock: Send)]
pub trait LocalClock {
    fn now(&self) -> Instant;

    async fn sleep(&self, duration: Duration);
}

/// Wall-clock time backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_follows_tokio_time() {
        let clock = TokioClock;
        let start = Clock::now(&clock);
        Clock::sleep(&clock, Duration::from_secs(30)).await;
        assert!(Clock::now(&clock) - start >= Duration::from_secs(30));
    }
}

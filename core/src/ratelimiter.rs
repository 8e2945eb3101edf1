use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};

/// Paces probe launches to at most `tokens_per_sec`. Owned by the admission
/// loop, so no background refill task outlives the sweep.
pub struct RateLimiter {
    ticker: Interval,
}

impl RateLimiter {
    pub fn new(tokens_per_sec: u32) -> Self {
        let period = Duration::from_nanos((1_000_000_000 / tokens_per_sec.max(1) as u64).max(1));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        RateLimiter { ticker }
    }

    /// Wait for the next launch slot. The first slot is immediate.
    pub async fn acquire(&mut self) {
        self.ticker.tick().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn spaces_launches_evenly() {
        let mut rl = RateLimiter::new(10);
        let start = Instant::now();
        for _ in 0..5 {
            rl.acquire().await;
        }
        // first slot free, then four 100ms gaps
        assert_eq!(start.elapsed(), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn extreme_rates_still_tick() {
        let mut rl = RateLimiter::new(u32::MAX);
        rl.acquire().await;
        rl.acquire().await;
    }
}

use std::time::Duration;

use neutralnews_common::config::SynthesisConfig;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::info;

/// Fixed-window limiter shared by all synthesis workers: at most
/// `max_calls` acquisitions per `window`. Callers over the limit sleep until
/// the window rolls over.
pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    state: Mutex<WindowState>,
}

struct WindowState {
    started: Instant,
    calls: usize,
}

impl RateLimiter {
    pub fn new(max_calls: usize, window: Duration) -> Self {
        Self {
            max_calls: max_calls.max(1),
            window,
            state: Mutex::new(WindowState {
                started: Instant::now(),
                calls: 0,
            }),
        }
    }

    pub fn from_config(config: &SynthesisConfig) -> Self {
        Self::new(
            config.calls_per_window,
            Duration::from_secs(config.window_secs),
        )
    }

    /// Wait for a free slot in the current window and take it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                if now.duration_since(state.started) >= self.window {
                    state.started = now;
                    state.calls = 0;
                }
                if state.calls < self.max_calls {
                    state.calls += 1;
                    return;
                }
                (state.started + self.window).saturating_duration_since(now)
            };
            info!(wait_secs = wait.as_secs_f64(), "Synthesis rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Force a cooldown: the next acquisition waits a full window.
    pub async fn trip(&self) {
        let mut state = self.state.lock().await;
        state.started = Instant::now();
        state.calls = self.max_calls;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn calls_within_limit_do_not_wait() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn call_over_limit_waits_for_window() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert!(start.elapsed() < Duration::from_secs(61));
    }

    #[tokio::test(start_paused = true)]
    async fn trip_forces_full_cooldown() {
        let limiter = RateLimiter::new(50, Duration::from_secs(60));
        limiter.acquire().await;
        tokio::time::advance(Duration::from_secs(30)).await;
        limiter.trip().await;

        let tripped_at = Instant::now();
        limiter.acquire().await;
        assert!(tripped_at.elapsed() >= Duration::from_secs(60));
    }
}

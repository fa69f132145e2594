//! Fixed-window rate limiter for listing calls.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug)]
struct Window {
    started: Instant,
    used: u32,
}

/// Allows at most `max_per_window` slots per window.
///
/// Once a window's slots are used up, the next caller sleeps out the rest of
/// the window and a new one starts. State lives in the limiter instance; each
/// GC orchestrator owns its own.
#[derive(Debug)]
pub struct RateLimiter {
    max_per_window: u32,
    window: Duration,
    state: Mutex<Window>,
}

impl RateLimiter {
    /// Creates a limiter with a one-second window.
    ///
    /// A limit of 0 is treated as 1.
    #[must_use]
    pub fn new(max_per_second: u32) -> Self {
        Self::with_window(max_per_second, Duration::from_secs(1))
    }

    /// Creates a limiter with a custom window length.
    #[must_use]
    pub fn with_window(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window: max_per_window.max(1),
            window,
            state: Mutex::new(Window {
                started: Instant::now(),
                used: 0,
            }),
        }
    }

    /// Slots per window.
    #[must_use]
    pub const fn max_per_window(&self) -> u32 {
        self.max_per_window
    }

    /// Waits until a slot is available and takes it.
    ///
    /// Callers are serialized while a window is being slept out.
    pub async fn wait_for_slot(&self) {
        let mut state = self.state.lock().await;

        if state.started.elapsed() >= self.window {
            state.started = Instant::now();
            state.used = 0;
        }

        if state.used >= self.max_per_window {
            let remaining = self.window.saturating_sub(state.started.elapsed());
            metrics::counter!("rate_limiter_waits_total").increment(1);
            debug!(
                wait_ms = u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
                "Rate limit reached, waiting for next window"
            );
            tokio::time::sleep(remaining).await;
            state.started = Instant::now();
            state.used = 0;
        }

        state.used += 1;
    }
}

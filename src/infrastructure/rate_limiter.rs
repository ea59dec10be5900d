//! Shared outbound rate limiter
//!
//! Token bucket with capacity and refill rate both equal to the configured
//! calls-per-second limit. Refill is continuous. The bucket starts empty, and
//! a grant is also refused while `limit` grants already fall inside the
//! trailing one-second window, so no one-second window ever sees more than
//! `limit` calls, even right after an idle period.
//!
//! Built on `tokio::time::Instant`, so tests can drive it with a paused clock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

const WINDOW: Duration = Duration::from_secs(1);
const MIN_WAIT: Duration = Duration::from_millis(1);
const EPSILON: f64 = 1e-9;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    /// Grant instants inside the trailing window, oldest first
    recent: VecDeque<Instant>,
}

#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    state: Mutex<BucketState>,
    granted: AtomicU64,
}

impl RateLimiter {
    /// `limit` is clamped to at least one call per second
    pub fn new(limit: u32) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            state: Mutex::new(BucketState {
                tokens: 0.0,
                last_refill: Instant::now(),
                recent: VecDeque::with_capacity(limit.min(1024) as usize),
            }),
            granted: AtomicU64::new(0),
        }
    }

    pub const fn limit(&self) -> u32 {
        self.limit
    }

    /// Total permits handed out so far
    pub fn granted(&self) -> u64 {
        self.granted.load(Ordering::Relaxed)
    }

    /// Take a permit now, or report how long to wait before trying again
    async fn try_acquire(&self) -> Result<(), Duration> {
        let rate = f64::from(self.limit);
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = elapsed.mul_add(rate, state.tokens).min(rate);
        state.last_refill = now;

        while let Some(&oldest) = state.recent.front() {
            if now.duration_since(oldest) >= WINDOW {
                state.recent.pop_front();
            } else {
                break;
            }
        }

        let window_full = state.recent.len() >= self.limit as usize;
        if state.tokens + EPSILON >= 1.0 && !window_full {
            state.tokens = (state.tokens - 1.0).max(0.0);
            state.recent.push_back(now);
            self.granted.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let token_wait = if state.tokens + EPSILON >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - state.tokens) / rate)
        };
        let window_wait = match state.recent.front() {
            Some(&oldest) if window_full => WINDOW.saturating_sub(now.duration_since(oldest)),
            _ => Duration::ZERO,
        };
        Err(token_wait.max(window_wait).max(MIN_WAIT))
    }

    /// Wait until a permit is available and take it
    pub async fn acquire(&self) {
        loop {
            match self.try_acquire().await {
                Ok(()) => return,
                Err(wait) => {
                    trace!("⏳ rate limiter waiting {:?}", wait);
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Like [`acquire`](Self::acquire) but gives up when `cancel` fires.
    /// Returns `false` if cancelled before a permit was taken.
    pub async fn acquire_cancellable(&self, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            () = self.acquire() => true,
            () = cancel.cancelled() => false,
        }
    }
}

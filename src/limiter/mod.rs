//! Token-bucket rate limiter guarding a rate-limited upstream
//! collaborator.
//!
//! Tokens accumulate on a fixed cadence up to a cap. A caller that
//! finds the bucket empty is parked in a bounded wait queue ordered by
//! priority, then arrival, and is woken when a refill cycle grants it a
//! token. The local token estimate is advisory; when the upstream
//! reports its own counters via [`RateLimiter::update_from_headers`]
//! they override the local state.
//!
//! Limiter state is process-local and resets safely to a full bucket on
//! restart.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Errors returned by acquisition attempts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AcquireError {
    /// The wait queue is at capacity.
    #[error("Rate limiter wait queue is full ({0} waiters)")]
    QueueFull(usize),

    /// The waiter was cancelled by an administrative queue clear or by
    /// the limiter shutting down.
    #[error("Rate limiter acquisition cancelled")]
    Cancelled,
}

/// Configuration for the rate limiter.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum tokens the bucket can hold.
    pub max_tokens: u32,
    /// Tokens added per refill interval.
    pub tokens_per_interval: u32,
    /// Refill cadence.
    pub refill_interval: Duration,
    /// Maximum number of parked waiters.
    pub max_queue: usize,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_tokens: 10,
            tokens_per_interval: 2,
            refill_interval: Duration::from_secs(1),
            max_queue: 1024,
        }
    }
}

/// Snapshot of the limiter state for operator introspection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimiterStatus {
    /// Currently available tokens.
    pub tokens: f64,
    /// Number of parked waiters.
    pub queued: usize,
    /// Milliseconds until the next refill grants a token, if the bucket
    /// is empty.
    pub next_token_in_ms: Option<u64>,
}

/// A parked acquisition, ordered by priority then arrival.
struct Waiter {
    priority: i32,
    seq: u64,
    grant: oneshot::Sender<()>,
    tag: Option<String>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: highest priority first, earliest arrival breaking
        // ties.
        self.priority
            .cmp(&other.priority)
            .then(other.seq.cmp(&self.seq))
    }
}

struct LimiterState {
    tokens: f64,
    last_refill: DateTime<Utc>,
    waiters: BinaryHeap<Waiter>,
    next_seq: u64,
}

impl LimiterState {
    fn drain_waiters(&mut self) {
        while self.tokens >= 1.0 {
            let Some(waiter) = self.waiters.pop() else {
                break;
            };
            // A dropped receiver means the caller gave up; the token
            // stays in the bucket.
            if waiter.grant.send(()).is_ok() {
                self.tokens -= 1.0;
                debug!(
                    priority = waiter.priority,
                    tag = waiter.tag.as_deref().unwrap_or(""),
                    "Granted rate limit token to waiter"
                );
            }
        }
    }
}

/// Token-bucket limiter with a priority wait queue.
pub struct RateLimiter {
    config: RateLimiterConfig,
    state: Arc<Mutex<LimiterState>>,
    refill_task: JoinHandle<()>,
}

impl RateLimiter {
    /// Creates a limiter with a full bucket and starts the refill task.
    pub fn new(config: RateLimiterConfig) -> Self {
        let state = Arc::new(Mutex::new(LimiterState {
            tokens: config.max_tokens as f64,
            last_refill: Utc::now(),
            waiters: BinaryHeap::new(),
            next_seq: 0,
        }));

        let refill_state = Arc::clone(&state);
        let max_tokens = config.max_tokens as f64;
        let per_interval = config.tokens_per_interval as f64;
        let interval = config.refill_interval;
        let refill_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so the initial
            // full bucket is not topped up out of cadence.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let mut state = refill_state.lock().await;
                state.tokens = (state.tokens + per_interval).min(max_tokens);
                state.last_refill = Utc::now();
                state.drain_waiters();
            }
        });

        Self {
            config,
            state,
            refill_task,
        }
    }

    /// Acquires one token, suspending until a refill cycle grants it.
    ///
    /// Waiters are served in priority order (higher first), with
    /// arrival order breaking ties. The optional tag only annotates
    /// logs.
    pub async fn acquire(&self, priority: i32, tag: Option<&str>) -> Result<(), AcquireError> {
        let rx = {
            let mut state = self.state.lock().await;

            if state.tokens >= 1.0 && state.waiters.is_empty() {
                state.tokens -= 1.0;
                return Ok(());
            }

            if state.waiters.len() >= self.config.max_queue {
                warn!(
                    queued = state.waiters.len(),
                    "Rate limiter wait queue full, rejecting acquisition"
                );
                return Err(AcquireError::QueueFull(state.waiters.len()));
            }

            let (tx, rx) = oneshot::channel();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.waiters.push(Waiter {
                priority,
                seq,
                grant: tx,
                tag: tag.map(str::to_string),
            });
            rx
        };

        rx.await.map_err(|_| AcquireError::Cancelled)
    }

    /// Overrides the local estimate with the upstream's authoritative
    /// counters: remaining tokens and the epoch second the window
    /// resets. Waiters are re-drained against the new balance.
    pub async fn update_from_headers(&self, remaining: u32, reset_epoch: i64) {
        let mut state = self.state.lock().await;
        state.tokens = (remaining as f64).min(self.config.max_tokens as f64);
        if let Some(reset) = Utc.timestamp_opt(reset_epoch, 0).single() {
            state.last_refill = reset.min(Utc::now());
        }
        debug!(remaining, reset_epoch, "Adopted upstream rate limit counters");
        state.drain_waiters();
    }

    /// Refills the bucket to capacity.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.tokens = self.config.max_tokens as f64;
        state.last_refill = Utc::now();
        state.drain_waiters();
    }

    /// Fails every parked waiter with [`AcquireError::Cancelled`].
    pub async fn clear_queue(&self) -> usize {
        let mut state = self.state.lock().await;
        let cleared = state.waiters.len();
        // Dropping the grant senders resolves each waiter's receiver
        // with a cancellation error.
        state.waiters.clear();
        if cleared > 0 {
            warn!(cleared, "Cleared rate limiter wait queue");
        }
        cleared
    }

    /// Returns a snapshot of current limiter state.
    pub async fn status(&self) -> RateLimiterStatus {
        let state = self.state.lock().await;
        let next_token_in_ms = if state.tokens >= 1.0 {
            None
        } else {
            let elapsed = (Utc::now() - state.last_refill)
                .to_std()
                .unwrap_or(Duration::ZERO);
            Some(
                self.config
                    .refill_interval
                    .saturating_sub(elapsed)
                    .as_millis() as u64,
            )
        };
        RateLimiterStatus {
            tokens: state.tokens,
            queued: state.waiters.len(),
            next_token_in_ms,
        }
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.refill_task.abort();
    }
}

// SPDX-License-Identifier: MIT

//! Token bucket throttle for LLM calls
//!
//! Each LLM node owns its own limiter, so unrelated nodes never contend on
//! the same lock. Capacity is the per-minute rate; tokens refill at
//! `rpm / 60` per second.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::flow::error::ProviderError;

/// What to do when the bucket is empty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleMode {
    /// Wait for a token, up to the configured maximum wait
    #[default]
    Block,
    /// Return `RateLimited` immediately
    FailFast,
}

const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
struct Bucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl Bucket {
    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
    }
}

/// Per-instance token bucket
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Option<Bucket>,
    mode: ThrottleMode,
    max_wait: Duration,
}

impl RateLimiter {
    /// A limiter that always grants immediately
    pub fn unlimited() -> Self {
        Self {
            bucket: None,
            mode: ThrottleMode::Block,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }

    /// Allow `rpm` requests per minute, starting with a full bucket
    pub fn per_minute(rpm: u32) -> Self {
        let rpm = rpm.max(1) as f64;
        Self {
            bucket: Some(Bucket {
                capacity: rpm,
                refill_per_sec: rpm / 60.0,
                state: Mutex::new(BucketState {
                    tokens: rpm,
                    last_refill: Instant::now(),
                }),
            }),
            mode: ThrottleMode::Block,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }

    pub fn with_mode(mut self, mode: ThrottleMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn is_limited(&self) -> bool {
        self.bucket.is_some()
    }

    pub fn mode(&self) -> ThrottleMode {
        self.mode
    }

    /// Take one permit, waiting or failing per the configured mode
    pub async fn acquire(&self) -> Result<(), ProviderError> {
        let Some(bucket) = &self.bucket else {
            return Ok(());
        };

        let wait = {
            let mut state = bucket.state.lock().await;
            bucket.refill(&mut state, Instant::now());

            if state.tokens >= 1.0 {
                state.tokens -= 1.0;
                return Ok(());
            }

            let wait = Duration::from_secs_f64((1.0 - state.tokens) / bucket.refill_per_sec);
            match self.mode {
                ThrottleMode::FailFast => {
                    return Err(ProviderError::RateLimited {
                        retry_after_secs: Some(wait.as_secs_f64().ceil() as u64),
                    });
                }
                ThrottleMode::Block if wait > self.max_wait => {
                    return Err(ProviderError::Timeout(self.max_wait));
                }
                ThrottleMode::Block => {
                    // Reserve the token now; later callers see the debt and queue behind us
                    state.tokens -= 1.0;
                    wait
                }
            }
        };

        log::debug!("Rate limit reached, waiting {:?}", wait);
        tokio::time::sleep(wait).await;
        Ok(())
    }

    /// Take a permit only if one is available right now
    pub async fn try_acquire(&self) -> bool {
        let Some(bucket) = &self.bucket else {
            return true;
        };
        let mut state = bucket.state.lock().await;
        bucket.refill(&mut state, Instant::now());
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Current token count (negative while callers are queued)
    pub async fn available_tokens(&self) -> f64 {
        match &self.bucket {
            None => f64::INFINITY,
            Some(bucket) => {
                let mut state = bucket.state.lock().await;
                bucket.refill(&mut state, Instant::now());
                state.tokens
            }
        }
    }
}

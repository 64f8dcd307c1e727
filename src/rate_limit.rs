//! Fixed-window request counting shared by every service instance.
//!
//! A counter lives at `rate_limit:<client>:<scope>:<window index>`. The first
//! increment in a window sets the key's TTL to the window length. INCR and
//! EXPIRE are two separate store calls: if the EXPIRE is lost the key outlives
//! its window. That case is logged and the request is still decided from the
//! counter value.

use crate::config::RateLimitConfig;
use crate::errors::{with_deadline, StoreError};
use crate::metrics::RATE_LIMIT_DECISIONS;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

pub const RATE_LIMIT_KEY_PREFIX: &str = "rate_limit";

pub fn window_key(client: &str, scope: &str, window_index: i64) -> String {
    format!("{}:{}:{}:{}", RATE_LIMIT_KEY_PREFIX, client, scope, window_index)
}

/// Atomic counters with expiry.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment and return the post-increment value. A missing key starts at 0.
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    /// Returns `false` when the key no longer exists.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Admitted,
    Rejected,
}

impl RateDecision {
    fn as_label(self) -> &'static str {
        match self {
            RateDecision::Admitted => "admitted",
            RateDecision::Rejected => "rejected",
        }
    }
}

pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    rate: u64,
    window: Duration,
    scope: String,
    timeout: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, config: &RateLimitConfig, timeout: Duration) -> Self {
        Self::with_limits(store, config.requests, config.window(), &config.scope, timeout)
    }

    pub fn with_limits(
        store: Arc<dyn CounterStore>,
        rate: u64,
        window: Duration,
        scope: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            rate,
            // a zero window would divide by zero below
            window: window.max(Duration::from_secs(1)),
            scope: scope.to_string(),
            timeout,
        }
    }

    pub async fn admit(&self, client: &str) -> Result<RateDecision, StoreError> {
        self.admit_at(client, Utc::now().timestamp()).await
    }

    pub async fn admit_at(&self, client: &str, now: i64) -> Result<RateDecision, StoreError> {
        let window_index = now.div_euclid(self.window.as_secs() as i64);
        let key = window_key(client, &self.scope, window_index);

        let count = with_deadline(self.timeout, self.store.incr(&key)).await?;

        if count == 1 {
            match with_deadline(self.timeout, self.store.expire(&key, self.window)).await {
                Ok(true) => {}
                Ok(false) => warn!(key = %key, "rate limit counter vanished before its TTL was set"),
                Err(e) => warn!(key = %key, error = %e, "rate limit counter left without TTL"),
            }
        }

        let decision = if count as u64 > self.rate {
            RateDecision::Rejected
        } else {
            RateDecision::Admitted
        };

        RATE_LIMIT_DECISIONS.with_label_values(&[decision.as_label()]).inc();
        debug!(client = %client, scope = %self.scope, count, decision = decision.as_label(), "rate limit");

        Ok(decision)
    }
}

/// Process-local counters with Redis-like expiry: a key past its TTL reads as
/// absent, and expired keys are dropped on the next increment.
#[derive(Default)]
pub struct MemoryCounterStore {
    counters: Mutex<HashMap<String, Counter>>,
}

struct Counter {
    count: i64,
    ttl: Option<(Duration, Instant)>,
}

impl Counter {
    fn expired(&self, now: Instant) -> bool {
        matches!(self.ttl, Some((_, deadline)) if deadline <= now)
    }
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// TTL last set on a live key.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.counters
            .lock()
            .await
            .get(key)
            .filter(|counter| !counter.expired(now))
            .and_then(|counter| counter.ttl.map(|(ttl, _)| ttl))
    }

    pub async fn len(&self) -> usize {
        self.counters.lock().await.len()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let now = Instant::now();
        let mut counters = self.counters.lock().await;
        counters.retain(|_, counter| !counter.expired(now));

        let counter = counters
            .entry(key.to_string())
            .or_insert(Counter { count: 0, ttl: None });
        counter.count += 1;
        Ok(counter.count)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        match self.counters.lock().await.get_mut(key) {
            Some(counter) if !counter.expired(now) => {
                counter.ttl = Some((ttl, now + ttl));
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

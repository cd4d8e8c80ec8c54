//! Per-client request rate limiting.
//!
//! Three fixed windows per client (burst, minute, hour). A request passes
//! only when every counter is below its limit; counters reset when their
//! window elapses. Increment-then-check keeps the hot path lock-free; the
//! over-admission bound is `limit + (concurrent requesters − 1)`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde::Serialize;

use crate::config::RateLimitConfig;
use crate::metrics::MetricsRegistry;

const MINUTE_MS: i64 = 60_000;
const HOUR_MS: i64 = 3_600_000;

struct WindowCounter {
    count: AtomicU32,
    window_start_ms: AtomicI64,
}

impl WindowCounter {
    fn new(now_ms: i64) -> Self {
        Self {
            count: AtomicU32::new(0),
            window_start_ms: AtomicI64::new(now_ms),
        }
    }

    /// Resets the counter when its window has elapsed. Only one of several
    /// concurrent resetters wins the CAS; the rest observe the fresh window.
    fn roll(&self, now_ms: i64, window_ms: i64) {
        let start = self.window_start_ms.load(Ordering::Acquire);
        if now_ms - start >= window_ms
            && self
                .window_start_ms
                .compare_exchange(start, now_ms, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.count.store(0, Ordering::Release);
        }
    }

    fn increment(&self) -> u32 {
        self.count.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn current(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }
}

struct ClientWindows {
    burst: WindowCounter,
    minute: WindowCounter,
    hour: WindowCounter,
}

impl ClientWindows {
    fn new(now_ms: i64) -> Self {
        Self {
            burst: WindowCounter::new(now_ms),
            minute: WindowCounter::new(now_ms),
            hour: WindowCounter::new(now_ms),
        }
    }
}

/// Point-in-time rate-limit status for one client.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStatus {
    pub client_id: String,
    pub burst_count: u32,
    pub minute_count: u32,
    pub hour_count: u32,
    pub burst_limit: u32,
    pub minute_limit: u32,
    pub hour_limit: u32,
}

/// Sliding-window rate limiter keyed per client.
pub struct RateLimiter {
    clients: RwLock<HashMap<String, Arc<ClientWindows>>>,
    config: RateLimitConfig,
    metrics: Arc<MetricsRegistry>,
}

impl RateLimiter {
    /// Creates a limiter with the given windows and limits.
    pub fn new(config: RateLimitConfig, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            config,
            metrics,
        }
    }

    fn windows(&self, client_id: &str) -> Arc<ClientWindows> {
        if let Some(existing) = self.clients.read().unwrap().get(client_id) {
            return Arc::clone(existing);
        }
        let now_ms = Utc::now().timestamp_millis();
        let mut clients = self.clients.write().unwrap();
        Arc::clone(
            clients
                .entry(client_id.to_string())
                .or_insert_with(|| Arc::new(ClientWindows::new(now_ms))),
        )
    }

    /// Admits or rejects one request for `client_id`.
    pub fn check(&self, client_id: &str) -> Result<(), crate::EngineError> {
        let windows = self.windows(client_id);
        let now_ms = Utc::now().timestamp_millis();

        windows
            .burst
            .roll(now_ms, self.config.burst_window.as_millis() as i64);
        windows.minute.roll(now_ms, MINUTE_MS);
        windows.hour.roll(now_ms, HOUR_MS);

        let burst = windows.burst.increment();
        let minute = windows.minute.increment();
        let hour = windows.hour.increment();

        if burst > self.config.burst_limit {
            tracing::warn!(client_id, "rate limit exceeded (burst window)");
            self.metrics.record_rate_limit_exceeded();
            return Err(crate::EngineError::RateLimited(client_id.to_string()));
        }
        if minute > self.config.minute_limit {
            tracing::warn!(client_id, "rate limit exceeded (per-minute)");
            self.metrics.record_rate_limit_exceeded();
            return Err(crate::EngineError::RateLimited(client_id.to_string()));
        }
        if hour > self.config.hour_limit {
            tracing::warn!(client_id, "rate limit exceeded (per-hour)");
            self.metrics.record_rate_limit_exceeded();
            return Err(crate::EngineError::RateLimited(client_id.to_string()));
        }

        self.metrics.record_request();
        Ok(())
    }

    /// Returns the current counters for one client.
    pub fn status(&self, client_id: &str) -> RateLimitStatus {
        let clients = self.clients.read().unwrap();
        let (burst, minute, hour) = match clients.get(client_id) {
            Some(windows) => (
                windows.burst.current(),
                windows.minute.current(),
                windows.hour.current(),
            ),
            None => (0, 0, 0),
        };
        RateLimitStatus {
            client_id: client_id.to_string(),
            burst_count: burst,
            minute_count: minute,
            hour_count: hour,
            burst_limit: self.config.burst_limit,
            minute_limit: self.config.minute_limit,
            hour_limit: self.config.hour_limit,
        }
    }

    /// Forgets a client's counters (admin operation).
    pub fn reset(&self, client_id: &str) {
        self.clients.write().unwrap().remove(client_id);
        tracing::info!(client_id, "rate limit reset");
    }
}

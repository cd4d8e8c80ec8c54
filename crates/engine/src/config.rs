//! Engine configuration with the documented defaults.

use std::time::Duration;

/// Saga-level execution defaults applied when a step or saga does not
/// override them.
#[derive(Debug, Clone)]
pub struct ExecutionDefaults {
    /// Default retry budget for sagas and steps.
    pub max_retries: u32,
    /// Default delay between retry attempts.
    pub retry_delay_ms: u64,
    /// Default per-attempt step timeout.
    pub timeout_ms: u64,
    /// Attempts for a single persist before a store error is surfaced.
    pub store_retry_attempts: u32,
    /// Backoff between persist attempts.
    pub store_retry_delay_ms: u64,
}

impl Default for ExecutionDefaults {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1_000,
            timeout_ms: 30_000,
            store_retry_attempts: 3,
            store_retry_delay_ms: 100,
        }
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures in CLOSED before the breaker opens.
    pub failure_threshold: u32,
    /// Successes in HALF_OPEN before the breaker closes.
    pub success_threshold: u32,
    /// Cooldown after the last failure before HALF_OPEN is allowed.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Rate limiter windows and limits.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Length of the burst window.
    pub burst_window: Duration,
    /// Requests allowed per burst window.
    pub burst_limit: u32,
    /// Requests allowed per minute.
    pub minute_limit: u32,
    /// Requests allowed per hour.
    pub hour_limit: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            burst_window: Duration::from_secs(10),
            burst_limit: 50,
            minute_limit: 100,
            hour_limit: 1_000,
        }
    }
}

/// Sizing for one worker pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolSizes {
    /// Maximum concurrently running jobs.
    pub max_concurrency: usize,
    /// Bounded queue capacity; overflow runs in the submitter (caller-runs).
    pub queue_capacity: usize,
}

/// Sizing for the three engine pools.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub saga_exec: PoolSizes,
    pub step_exec: PoolSizes,
    pub compensation: PoolSizes,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            saga_exec: PoolSizes {
                max_concurrency: 200,
                queue_capacity: 2_000,
            },
            step_exec: PoolSizes {
                max_concurrency: 400,
                queue_capacity: 2_000,
            },
            compensation: PoolSizes {
                max_concurrency: 50,
                queue_capacity: 200,
            },
        }
    }
}

/// Saga cache sizing.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_size: usize,
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1_000,
            ttl: Duration::from_secs(60),
        }
    }
}

/// Scheduler intervals and retention.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often timed-out sagas are swept.
    pub timeout_sweep_interval: Duration,
    /// How often retryable sagas are swept.
    pub retry_sweep_interval: Duration,
    /// Whether the retry sweep re-enqueues failed sagas.
    pub auto_retry: bool,
    /// How often old terminal sagas are purged.
    pub cleanup_interval: Duration,
    /// Terminal sagas older than this are purged.
    pub retention: Duration,
    /// How often a metrics snapshot is pushed to the event bus.
    pub metrics_push_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timeout_sweep_interval: Duration::from_secs(10),
            retry_sweep_interval: Duration::from_secs(60),
            auto_retry: false,
            cleanup_interval: Duration::from_secs(3_600),
            retention: Duration::from_secs(7 * 24 * 3_600),
            metrics_push_interval: Duration::from_secs(5),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub execution: ExecutionDefaults,
    pub breaker: BreakerConfig,
    pub rate_limit: RateLimitConfig,
    pub pools: PoolConfig,
    pub cache: CacheConfig,
    pub scheduler: SchedulerConfig,
}

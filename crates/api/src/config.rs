//! Application configuration loaded from environment variables.

use std::time::Duration;

use engine::{
    BreakerConfig, CacheConfig, EngineConfig, ExecutionDefaults, PoolConfig, PoolSizes,
    RateLimitConfig, SchedulerConfig,
};

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Server configuration with the documented defaults.
///
/// Reads from environment variables; every knob falls back to the
/// defaults from the engine configuration:
/// - `HOST`, `PORT`, `RUST_LOG`
/// - `DATABASE_URL` plus `DB_MAX_CONNECTIONS`, `DB_MIN_CONNECTIONS`,
///   `DB_IDLE_TIMEOUT_SECS`, `DB_MAX_LIFETIME_SECS`
/// - `SAGA_EXECUTION_MAX_RETRIES`, `SAGA_EXECUTION_RETRY_DELAY_MS`,
///   `SAGA_EXECUTION_TIMEOUT_MS`
/// - pool sizes: `SAGA_EXEC_MAX`, `SAGA_EXEC_QUEUE`, `STEP_EXEC_MAX`,
///   `STEP_EXEC_QUEUE`, `COMPENSATION_MAX`, `COMPENSATION_QUEUE`
/// - `RATE_LIMIT_BURST`, `RATE_LIMIT_BURST_WINDOW_SECS`,
///   `RATE_LIMIT_PER_MINUTE`, `RATE_LIMIT_PER_HOUR`
/// - `CIRCUIT_BREAKER_FAILURE_THRESHOLD`,
///   `CIRCUIT_BREAKER_SUCCESS_THRESHOLD`, `CIRCUIT_BREAKER_COOLDOWN_SECS`
/// - `SAGA_CACHE_MAX_SIZE`, `SAGA_CACHE_TTL_SECS`
/// - `SAGA_RETENTION_HOURS`, `SAGA_AUTO_RETRY`, `TIMEOUT_SWEEP_SECS`,
///   `RETRY_SWEEP_SECS`, `CLEANUP_INTERVAL_SECS`, `METRICS_PUSH_SECS`
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_idle_timeout: Duration,
    pub db_max_lifetime: Duration,
    pub engine: EngineConfig,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = EngineConfig::default();
        let engine = EngineConfig {
            execution: ExecutionDefaults {
                max_retries: env_parse(
                    "SAGA_EXECUTION_MAX_RETRIES",
                    defaults.execution.max_retries,
                ),
                retry_delay_ms: env_parse(
                    "SAGA_EXECUTION_RETRY_DELAY_MS",
                    defaults.execution.retry_delay_ms,
                ),
                timeout_ms: env_parse("SAGA_EXECUTION_TIMEOUT_MS", defaults.execution.timeout_ms),
                ..defaults.execution
            },
            breaker: BreakerConfig {
                failure_threshold: env_parse(
                    "CIRCUIT_BREAKER_FAILURE_THRESHOLD",
                    defaults.breaker.failure_threshold,
                ),
                success_threshold: env_parse(
                    "CIRCUIT_BREAKER_SUCCESS_THRESHOLD",
                    defaults.breaker.success_threshold,
                ),
                cooldown: Duration::from_secs(env_parse(
                    "CIRCUIT_BREAKER_COOLDOWN_SECS",
                    defaults.breaker.cooldown.as_secs(),
                )),
            },
            rate_limit: RateLimitConfig {
                burst_window: Duration::from_secs(env_parse(
                    "RATE_LIMIT_BURST_WINDOW_SECS",
                    defaults.rate_limit.burst_window.as_secs(),
                )),
                burst_limit: env_parse("RATE_LIMIT_BURST", defaults.rate_limit.burst_limit),
                minute_limit: env_parse("RATE_LIMIT_PER_MINUTE", defaults.rate_limit.minute_limit),
                hour_limit: env_parse("RATE_LIMIT_PER_HOUR", defaults.rate_limit.hour_limit),
            },
            pools: PoolConfig {
                saga_exec: PoolSizes {
                    max_concurrency: env_parse(
                        "SAGA_EXEC_MAX",
                        defaults.pools.saga_exec.max_concurrency,
                    ),
                    queue_capacity: env_parse(
                        "SAGA_EXEC_QUEUE",
                        defaults.pools.saga_exec.queue_capacity,
                    ),
                },
                step_exec: PoolSizes {
                    max_concurrency: env_parse(
                        "STEP_EXEC_MAX",
                        defaults.pools.step_exec.max_concurrency,
                    ),
                    queue_capacity: env_parse(
                        "STEP_EXEC_QUEUE",
                        defaults.pools.step_exec.queue_capacity,
                    ),
                },
                compensation: PoolSizes {
                    max_concurrency: env_parse(
                        "COMPENSATION_MAX",
                        defaults.pools.compensation.max_concurrency,
                    ),
                    queue_capacity: env_parse(
                        "COMPENSATION_QUEUE",
                        defaults.pools.compensation.queue_capacity,
                    ),
                },
            },
            cache: CacheConfig {
                max_size: env_parse("SAGA_CACHE_MAX_SIZE", defaults.cache.max_size),
                ttl: Duration::from_secs(env_parse(
                    "SAGA_CACHE_TTL_SECS",
                    defaults.cache.ttl.as_secs(),
                )),
            },
            scheduler: SchedulerConfig {
                timeout_sweep_interval: Duration::from_secs(env_parse(
                    "TIMEOUT_SWEEP_SECS",
                    defaults.scheduler.timeout_sweep_interval.as_secs(),
                )),
                retry_sweep_interval: Duration::from_secs(env_parse(
                    "RETRY_SWEEP_SECS",
                    defaults.scheduler.retry_sweep_interval.as_secs(),
                )),
                auto_retry: env_parse("SAGA_AUTO_RETRY", defaults.scheduler.auto_retry),
                cleanup_interval: Duration::from_secs(env_parse(
                    "CLEANUP_INTERVAL_SECS",
                    defaults.scheduler.cleanup_interval.as_secs(),
                )),
                retention: Duration::from_secs(
                    env_parse(
                        "SAGA_RETENTION_HOURS",
                        defaults.scheduler.retention.as_secs() / 3_600,
                    ) * 3_600,
                ),
                metrics_push_interval: Duration::from_secs(env_parse(
                    "METRICS_PUSH_SECS",
                    defaults.scheduler.metrics_push_interval.as_secs(),
                )),
            },
        };

        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_parse("PORT", 3000),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            database_url: std::env::var("DATABASE_URL").ok(),
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", 10),
            db_min_connections: env_parse("DB_MIN_CONNECTIONS", 1),
            db_idle_timeout: Duration::from_secs(env_parse("DB_IDLE_TIMEOUT_SECS", 600)),
            db_max_lifetime: Duration::from_secs(env_parse("DB_MAX_LIFETIME_SECS", 1_800)),
            engine,
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            db_max_connections: 10,
            db_min_connections: 1,
            db_idle_timeout: Duration::from_secs(600),
            db_max_lifetime: Duration::from_secs(1_800),
            engine: EngineConfig::default(),
        }
    }
}

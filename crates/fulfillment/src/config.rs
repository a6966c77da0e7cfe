//! Worker and relay configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use domain::OrderStatus;
use domain::keys::{DEFAULT_CACHE_TTL, ORDER_PLACED_QUEUE};

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T {
    lookup(name)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Fulfillment worker settings.
///
/// Reads from environment variables:
/// - `WORKER_CONCURRENCY` — deliveries handled at once (default: `4`)
/// - `WORKER_MAX_ATTEMPTS` — deliveries of one message before it is dead-lettered (default: `5`)
/// - `FULFILLMENT_LATENCY_MILLIS` — simulated fulfillment time (default: `2000`)
/// - `FULFILLMENT_TARGET_STATUS` — `Completed` or `Processing` (default: `Completed`)
/// - `WORKER_POLL_MILLIS` — how long one receive call waits (default: `1000`)
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub queue: String,
    pub concurrency: usize,
    pub max_attempts: u32,
    pub latency: Duration,
    pub target_status: OrderStatus,
    pub poll_wait: Duration,
}

impl WorkerConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let target_status = match lookup("FULFILLMENT_TARGET_STATUS")
            .and_then(|v| v.parse::<OrderStatus>().ok())
        {
            Some(status @ (OrderStatus::Completed | OrderStatus::Processing)) => status,
            _ => defaults.target_status,
        };

        Self {
            queue: defaults.queue,
            concurrency: parse_or(&lookup, "WORKER_CONCURRENCY", defaults.concurrency).max(1),
            max_attempts: parse_or(&lookup, "WORKER_MAX_ATTEMPTS", defaults.max_attempts).max(1),
            latency: Duration::from_millis(parse_or(&lookup, "FULFILLMENT_LATENCY_MILLIS", 2000)),
            target_status,
            poll_wait: Duration::from_millis(parse_or(&lookup, "WORKER_POLL_MILLIS", 1000)),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue: ORDER_PLACED_QUEUE.to_string(),
            concurrency: 4,
            max_attempts: 5,
            latency: Duration::from_millis(2000),
            target_status: OrderStatus::Completed,
            poll_wait: Duration::from_millis(1000),
        }
    }
}

/// Outbox relay settings.
///
/// Reads from environment variables:
/// - `OUTBOX_POLL_MILLIS` — pause between scans when idle (default: `500`)
/// - `OUTBOX_BATCH_SIZE` — entries published per scan (default: `100`)
/// - `OUTBOX_RETENTION_SECONDS` — how long delivered entries are kept (default: `3600`)
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub poll_interval: Duration,
    pub batch_size: usize,
    /// Upper bound of the backoff after consecutive publish failures.
    pub max_backoff: Duration,
    /// Age after which delivered entries are deleted.
    pub retention: Duration,
    /// Pause between two pruning passes.
    pub prune_interval: Duration,
}

impl RelayConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            poll_interval: Duration::from_millis(parse_or(&lookup, "OUTBOX_POLL_MILLIS", 500).max(1)),
            batch_size: parse_or(&lookup, "OUTBOX_BATCH_SIZE", defaults.batch_size).max(1),
            max_backoff: defaults.max_backoff,
            retention: Duration::from_secs(parse_or(
                &lookup,
                "OUTBOX_RETENTION_SECONDS",
                defaults.retention.as_secs(),
            )),
            prune_interval: defaults.prune_interval,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            batch_size: 100,
            max_backoff: Duration::from_secs(30),
            retention: Duration::from_secs(3600),
            prune_interval: Duration::from_secs(60),
        }
    }
}

/// Shared backing services.
///
/// Reads from environment variables:
/// - `DATABASE_URL` — PostgreSQL connection string; unset means in-memory backends
/// - `DATABASE_MAX_CONNECTIONS` — pool size (default: `10`)
/// - `CACHE_TTL_SECONDS` — lifetime of a cached order list (default: `120`)
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub cache_ttl: Duration,
}

impl BackendConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            database_url: lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()),
            max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", defaults.max_connections)
                .max(1),
            cache_ttl: Duration::from_secs(parse_or(
                &lookup,
                "CACHE_TTL_SECONDS",
                defaults.cache_ttl.as_secs(),
            )
            .max(1)),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 10,
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_worker_defaults() {
        let config = WorkerConfig::from_lookup(lookup(&[]));
        assert_eq!(config.queue, "order-placed");
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.latency, Duration::from_secs(2));
        assert_eq!(config.target_status, OrderStatus::Completed);
    }

    #[test]
    fn test_worker_overrides() {
        let config = WorkerConfig::from_lookup(lookup(&[
            ("WORKER_CONCURRENCY", "8"),
            ("WORKER_MAX_ATTEMPTS", "2"),
            ("FULFILLMENT_LATENCY_MILLIS", "0"),
            ("FULFILLMENT_TARGET_STATUS", "processing"),
            ("WORKER_POLL_MILLIS", "250"),
        ]));
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.latency, Duration::ZERO);
        assert_eq!(config.target_status, OrderStatus::Processing);
        assert_eq!(config.poll_wait, Duration::from_millis(250));
    }

    #[test]
    fn test_worker_rejects_unusable_values() {
        let config = WorkerConfig::from_lookup(lookup(&[
            ("WORKER_CONCURRENCY", "0"),
            ("WORKER_MAX_ATTEMPTS", "many"),
            ("FULFILLMENT_TARGET_STATUS", "Cancelled"),
        ]));
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.target_status, OrderStatus::Completed);
    }

    #[test]
    fn test_relay_config() {
        let config = RelayConfig::from_lookup(lookup(&[
            ("OUTBOX_POLL_MILLIS", "50"),
            ("OUTBOX_BATCH_SIZE", "10"),
            ("OUTBOX_RETENTION_SECONDS", "0"),
        ]));
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.retention, Duration::ZERO);

        let defaults = RelayConfig::from_lookup(lookup(&[]));
        assert_eq!(defaults.batch_size, 100);
        assert_eq!(defaults.poll_interval, Duration::from_millis(500));
        assert_eq!(defaults.retention, Duration::from_secs(3600));
    }

    #[test]
    fn test_backend_config() {
        let config = BackendConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/orders"),
            ("DATABASE_MAX_CONNECTIONS", "20"),
            ("CACHE_TTL_SECONDS", "30"),
        ]));
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/orders"));
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.cache_ttl, Duration::from_secs(30));

        let defaults = BackendConfig::from_lookup(lookup(&[("DATABASE_URL", "")]));
        assert!(defaults.database_url.is_none());
        assert_eq!(defaults.cache_ttl, Duration::from_secs(120));
    }
}

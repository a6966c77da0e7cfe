//! Fulfillment worker entry point.
//!
//! Consumes `OrderPlaced` events from the PostgreSQL-backed channel until
//! SIGINT or SIGTERM. Requires `DATABASE_URL`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use channel::PostgresChannel;
use fulfillment::bootstrap::{init_tracing, shutdown_signal};
use fulfillment::{BackendConfig, FulfillmentWorker, WorkerConfig};
use read_cache::{OrderHistoryCache, PostgresCache};
use sqlx::postgres::PgPoolOptions;
use storage::PostgresStore;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    // 1. Initialize tracing
    init_tracing();

    // 2. Expose Prometheus metrics on their own port
    let metrics_port: u16 = std::env::var("METRICS_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(9091);
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], metrics_port)))
        .install()
        .expect("failed to install Prometheus exporter");

    // 3. Connect and migrate
    let backend = BackendConfig::from_env();
    let database_url = backend
        .database_url
        .as_deref()
        .expect("DATABASE_URL must be set for the fulfillment worker");
    let pool = PgPoolOptions::new()
        .max_connections(backend.max_connections)
        .connect(database_url)
        .await
        .expect("failed to connect to database");
    let store = Arc::new(PostgresStore::new(pool.clone()));
    store.run_migrations().await.expect("migrations failed");

    // 4. Wire the worker
    let channel = Arc::new(PostgresChannel::new(pool.clone()));
    let cache_backend = PostgresCache::new(pool.clone());
    let cache = OrderHistoryCache::new(Arc::clone(&store), Arc::new(cache_backend.clone()))
        .with_ttl(backend.cache_ttl);
    let config = WorkerConfig::from_env();
    let worker = Arc::new(FulfillmentWorker::new(store, channel, cache, config));

    // 5. Run until a shutdown signal arrives
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(worker.run(shutdown.clone()));
    let purge = tokio::spawn(purge_expired_cache(
        cache_backend,
        backend.cache_ttl,
        shutdown.clone(),
    ));
    shutdown_signal().await;
    shutdown.cancel();
    for joined in [handle.await, purge.await] {
        if let Err(e) = joined {
            tracing::error!(error = %e, "background task failed");
        }
    }

    pool.close().await;
    tracing::info!("worker shut down gracefully");
}

/// Removes expired cache rows once per TTL until shutdown.
async fn purge_expired_cache(cache: PostgresCache, every: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => match cache.purge_expired().await {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(removed, "purged expired cache entries"),
                Err(e) => tracing::warn!(error = %e, "cache purge failed"),
            },
        }
    }
}

//! API server entry point.
//!
//! With `DATABASE_URL` set the server uses PostgreSQL for every backing
//! service and runs the outbox relay; the fulfillment worker is a separate
//! process. Without it everything runs in memory, worker included.

use std::sync::Arc;

use api::auth::{JwtConfig, JwtService};
use api::config::Config;
use api::{AppState, InMemoryPipeline, create_app, demo_catalog};
use channel::PostgresChannel;
use fulfillment::bootstrap::{init_tracing, shutdown_signal};
use fulfillment::{
    BackendConfig, FulfillmentWorker, OutboxRelay, PlacementService, RelayConfig, WorkerConfig,
};
use read_cache::{OrderHistoryCache, PostgresCache};
use sqlx::postgres::PgPoolOptions;
use storage::PostgresStore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    // 1. Initialize tracing
    init_tracing();
    let config = Config::from_env();
    let backend = BackendConfig::from_env();
    if !config.jwt_secret_configured {
        tracing::warn!("JWT_SECRET_KEY not set, using the development signing secret");
    }

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Wire backing services and background tasks
    let shutdown = CancellationToken::new();
    let mut background = JoinSet::new();

    let app = match backend.database_url.as_deref() {
        Some(database_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(backend.max_connections)
                .connect(database_url)
                .await
                .expect("failed to connect to database");
            let store = Arc::new(PostgresStore::new(pool.clone()));
            store.run_migrations().await.expect("migrations failed");

            if config.seed_demo_data {
                let (accounts, products) = demo_catalog();
                for account in &accounts {
                    store.upsert_account(account).await.expect("seeding failed");
                }
                for product in &products {
                    store.upsert_product(product).await.expect("seeding failed");
                }
                tracing::info!("demo catalog seeded");
            }

            let channel = Arc::new(PostgresChannel::new(pool.clone()));
            let cache =
                OrderHistoryCache::new(Arc::clone(&store), Arc::new(PostgresCache::new(pool)))
                    .with_ttl(backend.cache_ttl);

            let relay = OutboxRelay::new(
                Arc::clone(&store),
                channel.clone(),
                RelayConfig::from_env(),
            );
            background.spawn(relay.run(shutdown.clone()));

            let state = Arc::new(AppState {
                placement: PlacementService::new(store, channel, cache),
                jwt: JwtService::new(config.jwt.clone()),
            });
            create_app(state, metrics_handle)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, running in-memory demo mode");
            let demo = InMemoryPipeline::seeded(config.jwt.clone(), backend.cache_ttl).await;
            log_demo_token(&config.jwt);

            let channel = Arc::new(demo.channel.clone());
            let relay = OutboxRelay::new(
                Arc::clone(&demo.store),
                channel.clone(),
                RelayConfig::from_env(),
            );
            background.spawn(relay.run(shutdown.clone()));

            let worker = Arc::new(FulfillmentWorker::new(
                Arc::clone(&demo.store),
                channel,
                demo.state.placement.cache().clone(),
                WorkerConfig::from_env(),
            ));
            background.spawn(worker.run(shutdown.clone()));

            create_app(demo.state, metrics_handle)
        }
    };

    // 4. Start server
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    let signal = {
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(signal)
        .await
        .expect("server error");

    // 5. Drain background tasks
    shutdown.cancel();
    while let Some(joined) = background.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "background task failed");
        }
    }

    tracing::info!("server shut down gracefully");
}

fn log_demo_token(jwt: &JwtConfig) {
    match JwtService::new(jwt.clone()).issue("B1", chrono::Duration::hours(12)) {
        Ok(token) => tracing::info!(user_id = "B1", %token, "demo bearer token"),
        Err(e) => tracing::warn!(error = %e, "could not issue demo token"),
    }
}

//! HTTP API server for order placement and order history.
//!
//! Provides REST endpoints behind bearer-token authentication, with
//! correlation-id propagation, structured logging (tracing) and Prometheus
//! metrics.

pub mod auth;
pub mod config;
pub mod correlation;
pub mod error;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::FromRef;
use axum::middleware;
use axum::routing::{get, post};
use channel::InMemoryChannel;
use domain::{Account, Money, Product};
use fulfillment::PlacementService;
use metrics_exporter_prometheus::PrometheusHandle;
use read_cache::{InMemoryCache, OrderHistoryCache};
use storage::{InMemoryStore, PlacementStore};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use auth::{JwtConfig, JwtService};
use correlation::correlation_middleware;

/// Shared application state accessible from all handlers.
pub struct AppState<S: PlacementStore> {
    pub placement: PlacementService<S>,
    pub jwt: JwtService,
}

impl<S: PlacementStore> FromRef<Arc<AppState<S>>> for JwtService {
    fn from_ref(state: &Arc<AppState<S>>) -> Self {
        state.jwt.clone()
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: PlacementStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders", post(routes::orders::create::<S>))
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route(
            "/buyers/{buyer_ref}/orders",
            get(routes::orders::list_for_buyer::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(middleware::from_fn(correlation_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Accounts and products available out of the box in demo mode.
pub fn demo_catalog() -> (Vec<Account>, Vec<Product>) {
    let accounts = vec![Account::new("B1", "alice"), Account::new("B2", "bob")];
    let products = vec![
        Product::new("P1", "Mechanical keyboard", Money::from_cents(1999), 10),
        Product::new("P2", "USB-C cable", Money::from_cents(500), 100),
        Product::new("P3", "Discontinued mouse", Money::from_cents(1250), 5).deactivated(),
    ];
    (accounts, products)
}

/// Fully in-memory pipeline, used in demo mode and by the HTTP tests.
pub struct InMemoryPipeline {
    pub store: Arc<InMemoryStore>,
    pub channel: InMemoryChannel,
    pub cache: InMemoryCache,
    pub state: Arc<AppState<InMemoryStore>>,
}

impl InMemoryPipeline {
    /// Builds the pipeline and seeds it with [`demo_catalog`].
    pub async fn seeded(jwt: JwtConfig, cache_ttl: Duration) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let (accounts, products) = demo_catalog();
        for account in accounts {
            store.add_account(account).await;
        }
        for product in products {
            store.add_product(product).await;
        }

        let channel = InMemoryChannel::new();
        let cache = InMemoryCache::new();
        let history = OrderHistoryCache::new(Arc::clone(&store), Arc::new(cache.clone()))
            .with_ttl(cache_ttl);
        let state = Arc::new(AppState {
            placement: PlacementService::new(
                Arc::clone(&store),
                Arc::new(channel.clone()),
                history,
            ),
            jwt: JwtService::new(jwt),
        });

        Self {
            store,
            channel,
            cache,
            state,
        }
    }
}

//! HTTP API server with observability for the order service.
//!
//! Provides REST endpoints for order management, with a per-request execution
//! context (deadline and cancellation), structured logging (tracing) and
//! Prometheus metrics. The binary also carries a `stress-test` subcommand
//! that loads a running server with generated orders.

pub mod cli;
pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod stress;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, put};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::OrderRepository;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use cli::{Cli, Command};
pub use config::{Config, LogFormat};
pub use error::ApiError;
pub use routes::orders::AppState;

/// Prefix under which the order endpoints are served.
pub const API_PREFIX: &str = "/api/v1";

/// Creates the Axum application router with all routes and shared state.
///
/// `request_timeout` is the deadline given to each request that does not
/// carry its own `X-Timeout-Duration`.
pub fn create_app<R: OrderRepository + 'static>(
    state: Arc<AppState<R>>,
    metrics_handle: PrometheusHandle,
    request_timeout: Duration,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    let order_routes: Router<Arc<AppState<R>>> = Router::new()
        .route(
            "/orders",
            get(routes::orders::list::<R>).post(routes::orders::create::<R>),
        )
        .route(
            "/orders/{id}",
            get(routes::orders::get::<R>).delete(routes::orders::delete::<R>),
        )
        .route("/orders/{id}/status", put(routes::orders::update_status::<R>));

    Router::new()
        .route("/healthz", get(routes::health::check))
        .nest(API_PREFIX, order_routes)
        .with_state(state)
        .merge(metrics_router)
        .layer(axum::middleware::from_fn_with_state(
            request_timeout,
            middleware::request_context,
        ))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

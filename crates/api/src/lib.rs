//! HTTP API server with observability for the marketplace core.
//!
//! Provides REST endpoints for listing management, order lifecycle actions,
//! payment-gateway callbacks, handoff confirmation, and dispute handling,
//! with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use domain::{InMemoryCatalogSink, InMemoryNotifier, OrderEngine};
use ledger::LedgerStore;
use metrics_exporter_prometheus::PrometheusHandle;
use settlement::{
    InMemoryPayoutGateway, PaymentReconciler, SettlementConfig, SettlementScheduler,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<L: LedgerStore + Clone + 'static>(
    state: Arc<AppState<L>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/books", post(routes::books::create::<L>))
        .route("/books/{id}", get(routes::books::get::<L>))
        .route("/books/{id}/withdraw", post(routes::books::withdraw::<L>))
        .route("/orders", post(routes::orders::create::<L>))
        .route("/orders/{id}", get(routes::orders::get::<L>))
        .route("/orders/{id}/history", get(routes::orders::history::<L>))
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<L>))
        .route(
            "/orders/{id}/confirm-meetup",
            post(routes::orders::confirm_meetup::<L>),
        )
        .route(
            "/orders/{id}/confirm-receipt",
            post(routes::orders::confirm_receipt::<L>),
        )
        .route(
            "/orders/{id}/report-delivery",
            post(routes::orders::report_delivery::<L>),
        )
        .route("/orders/{id}/dispute", post(routes::orders::dispute::<L>))
        .route(
            "/orders/{id}/resolve-dispute",
            post(routes::orders::resolve_dispute::<L>),
        )
        .route("/orders/{id}/settle", post(routes::orders::settle::<L>))
        .route("/payment-callback", post(routes::payments::callback::<L>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the default application state with the engine, reconciler, and
/// scheduler wired over one ledger and in-memory collaborators.
pub fn create_default_state<L: LedgerStore + Clone + 'static>(
    ledger: L,
    settlement_config: SettlementConfig,
) -> Arc<AppState<L>> {
    let notifier = InMemoryNotifier::new();
    let catalog = InMemoryCatalogSink::new();
    let payout_gateway = InMemoryPayoutGateway::new();

    let engine = OrderEngine::new(ledger.clone(), notifier, catalog);
    let reconciler = PaymentReconciler::new(
        ledger.clone(),
        engine.clone(),
        settlement_config.clone(),
    );
    let scheduler = SettlementScheduler::new(
        ledger.clone(),
        engine.clone(),
        payout_gateway.clone(),
        settlement_config,
    );

    Arc::new(AppState {
        engine,
        reconciler,
        scheduler,
        payout_gateway,
        ledger,
    })
}

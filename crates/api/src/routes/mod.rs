//! Route handlers and shared application state.

pub mod books;
pub mod health;
pub mod metrics;
pub mod orders;
pub mod payments;

use common::OrderId;
use domain::{EngineError, InMemoryCatalogSink, InMemoryNotifier, OrderEngine};
use ledger::{LedgerStore, OrderState};
use settlement::{InMemoryPayoutGateway, PaymentReconciler, SettlementScheduler};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<L: LedgerStore> {
    pub engine: OrderEngine<L, InMemoryNotifier, InMemoryCatalogSink>,
    pub reconciler: PaymentReconciler<L, InMemoryNotifier, InMemoryCatalogSink>,
    pub scheduler:
        SettlementScheduler<L, InMemoryNotifier, InMemoryCatalogSink, InMemoryPayoutGateway>,
    pub payout_gateway: InMemoryPayoutGateway,
    pub ledger: L,
}

/// Looks up the authoritative order state for an error body.
pub(crate) async fn current_order_state<L: LedgerStore + Clone>(
    state: &AppState<L>,
    order_id: OrderId,
) -> Option<OrderState> {
    state
        .engine
        .order(order_id)
        .await
        .ok()
        .flatten()
        .map(|o| o.state)
}

/// Wraps an engine error with the order's authoritative state.
pub(crate) async fn engine_error<L: LedgerStore + Clone>(
    state: &AppState<L>,
    order_id: OrderId,
    err: EngineError,
) -> ApiError {
    let order_state = current_order_state(state, order_id).await;
    ApiError::Engine { err, order_state }
}

pub(crate) fn parse_uuid(id: &str, what: &str) -> Result<uuid::Uuid, ApiError> {
    uuid::Uuid::parse_str(id).map_err(|e| ApiError::BadRequest(format!("Invalid {what}: {e}")))
}

//! Payment gateway callback endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use common::{Money, OrderId};
use ledger::{LedgerStore, OrderState, PaymentOutcome};
use serde::{Deserialize, Serialize};
use settlement::SettlementError;

use crate::error::ApiError;

use super::{AppState, current_order_state, parse_uuid};

#[derive(Deserialize)]
pub struct PaymentCallbackRequest {
    pub gateway_txn_id: String,
    pub order_id: String,
    pub amount_cents: i64,
    pub outcome: PaymentOutcome,
}

#[derive(Serialize)]
pub struct PaymentCallbackResponse {
    pub status: &'static str,
    pub order_state: OrderState,
}

/// POST /payment-callback — asynchronous gateway callback.
///
/// Processed idempotently: the gateway delivers at-least-once, and a
/// repeated transaction id acknowledges without re-applying any effect.
#[tracing::instrument(skip(state, req), fields(gateway_txn_id = %req.gateway_txn_id))]
pub async fn callback<L: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Json(req): Json<PaymentCallbackRequest>,
) -> Result<Json<PaymentCallbackResponse>, ApiError> {
    let order_id = OrderId::from_uuid(parse_uuid(&req.order_id, "order_id")?);

    let result = state
        .reconciler
        .handle_callback(
            &req.gateway_txn_id,
            order_id,
            Money::from_cents(req.amount_cents),
            req.outcome,
        )
        .await;

    match result {
        Ok(order) => Ok(Json(PaymentCallbackResponse {
            status: "applied",
            order_state: order.state,
        })),
        Err(SettlementError::AlreadyProcessed { .. }) => {
            let order_state = current_order_state(&state, order_id)
                .await
                .ok_or_else(|| ApiError::NotFound(format!("Order {order_id} not found")))?;
            Ok(Json(PaymentCallbackResponse {
                status: "already_processed",
                order_state,
            }))
        }
        Err(SettlementError::UnknownOrder(id)) => {
            Err(ApiError::NotFound(format!("Order {id} not found")))
        }
        Err(err) => {
            let order_state = current_order_state(&state, order_id).await;
            Err(ApiError::Settlement { err, order_state })
        }
    }
}

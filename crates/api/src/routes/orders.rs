//! Order lifecycle endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use common::{BookId, OrderId, UserId};
use domain::DisputeResolution;
use ledger::{LedgerStore, OrderRecord, OrderState};
use serde::{Deserialize, Serialize};
use settlement::SettlementError;

use crate::error::ApiError;

use super::{AppState, current_order_state, engine_error, parse_uuid};

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub book_id: String,
    pub buyer_id: Option<String>,
    pub meetup_location: String,
}

#[derive(Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct ConfirmReceiptRequest {
    pub scanned_code: String,
}

#[derive(Deserialize)]
pub struct ResolveDisputeRequest {
    pub resolution: DisputeResolution,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub book_id: String,
    pub buyer_id: String,
    pub seller_id: String,
    pub price_cents: i64,
    pub meetup_location: String,
    pub state: OrderState,
    pub settlement_failed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl From<&OrderRecord> for OrderResponse {
    fn from(order: &OrderRecord) -> Self {
        Self {
            id: order.id.to_string(),
            book_id: order.book_id.to_string(),
            buyer_id: order.buyer_id.to_string(),
            seller_id: order.seller_id.to_string(),
            price_cents: order.price.cents(),
            meetup_location: order.meetup_location.clone(),
            state: order.state,
            settlement_failed: order.settlement_failed,
            created_at: order.created_at,
            updated_at: order.updated_at,
            version: order.version.as_i64(),
        }
    }
}

#[derive(Serialize)]
pub struct MeetupConfirmedResponse {
    /// Token to render as the buyer's QR code for the handoff.
    pub handoff_token: String,
    pub order: OrderResponse,
}

#[derive(Serialize)]
pub struct TransitionResponse {
    pub from: Option<OrderState>,
    pub to: OrderState,
    pub at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct SettleResponse {
    pub status: &'static str,
    pub order: OrderResponse,
}

// -- Handlers --

/// POST /orders — reserve a book and create the order.
#[tracing::instrument(skip(state, req))]
pub async fn create<L: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(axum::http::StatusCode, Json<OrderResponse>), ApiError> {
    let book_id = BookId::from_uuid(parse_uuid(&req.book_id, "book_id")?);
    let buyer_id = match &req.buyer_id {
        Some(id) => UserId::from_uuid(parse_uuid(id, "buyer_id")?),
        None => UserId::new(),
    };

    let order = state
        .engine
        .place_order(book_id, buyer_id, &req.meetup_location)
        .await
        .map_err(|err| ApiError::Engine {
            err,
            order_state: None,
        })?;

    Ok((axum::http::StatusCode::CREATED, Json((&order).into())))
}

/// GET /orders/{id} — load an order by ID.
#[tracing::instrument(skip(state))]
pub async fn get<L: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = order_id(&id)?;

    let order = state
        .engine
        .order(order_id)
        .await
        .map_err(|err| ApiError::Engine {
            err,
            order_state: None,
        })?
        .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))?;

    Ok(Json((&order).into()))
}

/// GET /orders/{id}/history — the order's transition audit trail.
#[tracing::instrument(skip(state))]
pub async fn history<L: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<TransitionResponse>>, ApiError> {
    let order_id = order_id(&id)?;

    let transitions = state
        .engine
        .history(order_id)
        .await
        .map_err(|err| ApiError::Engine {
            err,
            order_state: None,
        })?;

    if transitions.is_empty() {
        return Err(ApiError::NotFound(format!("Order {id} not found")));
    }

    Ok(Json(
        transitions
            .into_iter()
            .map(|t| TransitionResponse {
                from: t.from,
                to: t.to,
                at: t.at,
            })
            .collect(),
    ))
}

/// POST /orders/{id}/cancel — cancel before handoff.
#[tracing::instrument(skip(state, req))]
pub async fn cancel<L: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = order_id(&id)?;
    let reason = req.reason.as_deref().unwrap_or("cancelled by party");

    match state.engine.cancel(order_id, reason).await {
        Ok(order) => Ok(Json((&order).into())),
        Err(err) => Err(engine_error(&state, order_id, err).await),
    }
}

/// POST /orders/{id}/confirm-meetup — confirm the meet-up and bind the
/// handoff token.
#[tracing::instrument(skip(state))]
pub async fn confirm_meetup<L: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
) -> Result<Json<MeetupConfirmedResponse>, ApiError> {
    let order_id = order_id(&id)?;

    match state.engine.confirm_meetup(order_id).await {
        Ok(order) => {
            let handoff_token = order
                .handoff_token
                .clone()
                .ok_or_else(|| ApiError::Internal("handoff token missing after bind".to_string()))?;
            Ok(Json(MeetupConfirmedResponse {
                handoff_token,
                order: (&order).into(),
            }))
        }
        Err(err) => Err(engine_error(&state, order_id, err).await),
    }
}

/// POST /orders/{id}/confirm-receipt — the buyer's QR scan.
///
/// A matching code moves the order to Delivered and triggers an immediate
/// settlement attempt; a payout failure leaves the order Delivered with
/// the failure marker and is reported by the settlement pipeline, not
/// here.
#[tracing::instrument(skip(state, req))]
pub async fn confirm_receipt<L: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
    Json(req): Json<ConfirmReceiptRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = order_id(&id)?;

    let order = match state.engine.confirm_receipt(order_id, &req.scanned_code).await {
        Ok(order) => order,
        Err(err) => return Err(engine_error(&state, order_id, err).await),
    };

    // Receipt confirmation is the verifiable handoff; settle right away.
    match state.scheduler.settle(order_id).await {
        Ok(order) => Ok(Json((&order).into())),
        Err(e) => {
            tracing::warn!(%order_id, error = %e, "settlement after receipt deferred");
            let order = state
                .engine
                .order(order_id)
                .await
                .ok()
                .flatten()
                .unwrap_or(order);
            Ok(Json((&order).into()))
        }
    }
}

/// POST /orders/{id}/report-delivery — the seller reports the handoff.
#[tracing::instrument(skip(state))]
pub async fn report_delivery<L: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = order_id(&id)?;

    match state.engine.report_delivery(order_id).await {
        Ok(order) => Ok(Json((&order).into())),
        Err(err) => Err(engine_error(&state, order_id, err).await),
    }
}

/// POST /orders/{id}/dispute — flag non-delivery or mismatch.
#[tracing::instrument(skip(state))]
pub async fn dispute<L: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = order_id(&id)?;

    match state.engine.open_dispute(order_id).await {
        Ok(order) => Ok(Json((&order).into())),
        Err(err) => Err(engine_error(&state, order_id, err).await),
    }
}

/// POST /orders/{id}/resolve-dispute — apply the arbitration outcome.
#[tracing::instrument(skip(state, req))]
pub async fn resolve_dispute<L: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
    Json(req): Json<ResolveDisputeRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = order_id(&id)?;

    match state.engine.resolve_dispute(order_id, req.resolution).await {
        Ok(order) => Ok(Json((&order).into())),
        Err(err) => Err(engine_error(&state, order_id, err).await),
    }
}

/// POST /orders/{id}/settle — explicit settlement trigger (operator or
/// retry path). Replay is a benign no-op.
#[tracing::instrument(skip(state))]
pub async fn settle<L: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
) -> Result<Json<SettleResponse>, ApiError> {
    let order_id = order_id(&id)?;

    match state.scheduler.settle(order_id).await {
        Ok(order) => Ok(Json(SettleResponse {
            status: "released",
            order: (&order).into(),
        })),
        Err(SettlementError::AlreadySettled(_)) => {
            let order = state
                .engine
                .order(order_id)
                .await
                .ok()
                .flatten()
                .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))?;
            Ok(Json(SettleResponse {
                status: "already_settled",
                order: (&order).into(),
            }))
        }
        Err(err) => {
            let order_state = current_order_state(&state, order_id).await;
            Err(ApiError::Settlement { err, order_state })
        }
    }
}

fn order_id(id: &str) -> Result<OrderId, ApiError> {
    Ok(OrderId::from_uuid(parse_uuid(id, "order id")?))
}

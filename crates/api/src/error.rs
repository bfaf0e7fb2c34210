//! API error types with HTTP response mapping.
//!
//! Error bodies carry the current authoritative order state whenever one is
//! known, so clients resynchronize instead of guessing.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::EngineError;
use ledger::{LedgerError, OrderState};
use settlement::SettlementError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Order engine error, with the authoritative order state if known.
    Engine {
        err: EngineError,
        order_state: Option<OrderState>,
    },
    /// Settlement error, with the authoritative order state if known.
    Settlement {
        err: SettlementError,
        order_state: Option<OrderState>,
    },
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, order_state) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            ApiError::Engine { err, order_state } => {
                let status = engine_status(&err);
                (status, err.to_string(), order_state)
            }
            ApiError::Settlement { err, order_state } => {
                let status = settlement_status(&err);
                (status, err.to_string(), order_state)
            }
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg, None)
            }
        };

        let body = match order_state {
            Some(state) => serde_json::json!({ "error": message, "order_state": state }),
            None => serde_json::json!({ "error": message }),
        };
        (status, axum::Json(body)).into_response()
    }
}

fn engine_status(err: &EngineError) -> StatusCode {
    match err {
        EngineError::BookNotFound(_) | EngineError::OrderNotFound(_) => StatusCode::NOT_FOUND,
        EngineError::AlreadyReserved(_)
        | EngineError::BookUnavailable { .. }
        | EngineError::InvalidTransition { .. }
        | EngineError::AlreadySettled(_)
        | EngineError::Conflict(_) => StatusCode::CONFLICT,
        EngineError::OwnListing | EngineError::InvalidPrice(_) => StatusCode::BAD_REQUEST,
        EngineError::AmountMismatch { .. } | EngineError::InvalidToken => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        EngineError::Ledger(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn settlement_status(err: &SettlementError) -> StatusCode {
    match err {
        SettlementError::UnknownOrder(_) => StatusCode::NOT_FOUND,
        SettlementError::AlreadyProcessed { .. }
        | SettlementError::AlreadySettled(_)
        | SettlementError::NotDeliveredYet { .. }
        | SettlementError::Disputed(_) => StatusCode::CONFLICT,
        SettlementError::WindowExpired(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SettlementError::PayoutExhausted { .. } => StatusCode::BAD_GATEWAY,
        SettlementError::Engine(err) => engine_status(err),
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError::Engine {
            err: err.into(),
            order_state: None,
        }
    }
}

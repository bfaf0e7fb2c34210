//! Settlement error types.

use common::OrderId;
use domain::EngineError;
use ledger::{LedgerError, OrderState};
use thiserror::Error;

use crate::gateway::GatewayError;

/// Errors that can occur during payment reconciliation and settlement.
#[derive(Debug, Error)]
pub enum SettlementError {
    /// The callback or settlement request named an unknown order.
    #[error("Order not found: {0}")]
    UnknownOrder(OrderId),

    /// A callback with this gateway transaction id was already applied.
    /// Benign under at-least-once delivery; no state was changed.
    #[error("Payment event already processed: {gateway_txn_id}")]
    AlreadyProcessed { gateway_txn_id: String },

    /// A post-settlement refund arrived outside the dispute window.
    #[error("Refund window expired for order {0}")]
    WindowExpired(OrderId),

    /// Settlement was requested for an order that has not been delivered.
    #[error("Order {order_id} is {state}, not delivered yet")]
    NotDeliveredYet {
        order_id: OrderId,
        state: OrderState,
    },

    /// Funds were already released for this order. Benign on replay; no
    /// additional settlement row was created.
    #[error("Funds already released for order {0}")]
    AlreadySettled(OrderId),

    /// The order is disputed; settlement is withheld.
    #[error("Order {0} is disputed, settlement withheld")]
    Disputed(OrderId),

    /// Payout attempts were exhausted. The order keeps its Delivered state
    /// with the settlement-failure marker set for the operator.
    #[error("Payout for order {order_id} failed after {attempts} attempts")]
    PayoutExhausted {
        order_id: OrderId,
        attempts: u32,
        #[source]
        source: GatewayError,
    },

    /// An error from the order engine.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl From<LedgerError> for SettlementError {
    fn from(e: LedgerError) -> Self {
        SettlementError::Engine(e.into())
    }
}

/// Result type for settlement operations.
pub type Result<T> = std::result::Result<T, SettlementError>;

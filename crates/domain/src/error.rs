//! Domain error types.

use common::{BookId, Money, OrderId};
use ledger::{BookStatus, LedgerError, OrderState};
use thiserror::Error;

/// Errors that can occur while driving the order lifecycle.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The book was not found.
    #[error("Book not found: {0}")]
    BookNotFound(BookId),

    /// The order was not found.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The book is already claimed by another active order.
    #[error("Book {0} is already reserved")]
    AlreadyReserved(BookId),

    /// The book is not in a status that allows the requested operation.
    #[error("Book {book_id} is {status}, not available")]
    BookUnavailable { book_id: BookId, status: BookStatus },

    /// A buyer tried to reserve their own listing.
    #[error("A seller cannot reserve their own listing")]
    OwnListing,

    /// The listing price is not positive.
    #[error("Invalid listing price: {0}")]
    InvalidPrice(Money),

    /// The order is not in a state that allows the requested action.
    #[error("Cannot {action} from {state} state")]
    InvalidTransition {
        state: OrderState,
        action: &'static str,
    },

    /// A payment callback reported an amount different from the order's
    /// agreed price.
    #[error("Payment amount {actual} does not match order amount {expected}")]
    AmountMismatch { expected: Money, actual: Money },

    /// The scanned code does not match the bound handoff token.
    #[error("Scanned code does not match the handoff token")]
    InvalidToken,

    /// Funds were already released for this order.
    #[error("Funds already released for order {0}")]
    AlreadySettled(OrderId),

    /// Concurrent writers kept winning; the write was retried with fresh
    /// reads up to the attempt bound and still conflicted.
    #[error("Write conflict on order {0} persisted after retries")]
    Conflict(OrderId),

    /// A ledger failure that is not one of the typed outcomes above.
    #[error("Ledger error: {0}")]
    Ledger(LedgerError),
}

impl From<LedgerError> for EngineError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Conflict { order_id, .. } => EngineError::Conflict(order_id),
            LedgerError::BookNotFound(id) => EngineError::BookNotFound(id),
            LedgerError::OrderNotFound(id) => EngineError::OrderNotFound(id),
            LedgerError::AlreadyReserved(id) => EngineError::AlreadyReserved(id),
            LedgerError::BookUnavailable { book_id, status } => {
                EngineError::BookUnavailable { book_id, status }
            }
            LedgerError::AlreadySettled(id) => EngineError::AlreadySettled(id),
            other => EngineError::Ledger(other),
        }
    }
}

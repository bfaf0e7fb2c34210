use thiserror::Error;

use common::{BookId, OrderId};

use crate::records::{BookStatus, Version};

/// Errors that can occur when interacting with the ledger store.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// An order write carried a stale version. The caller must re-read and
    /// retry.
    #[error("Stale write on order {order_id}: expected version {expected}, found {actual}")]
    Conflict {
        order_id: OrderId,
        expected: Version,
        actual: Version,
    },

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

    /// A payment event with this gateway transaction id was already
    /// persisted.
    #[error("Payment event already recorded for gateway transaction {gateway_txn_id}")]
    DuplicatePaymentEvent { gateway_txn_id: String },

    /// A released settlement already exists for this order.
    #[error("Funds already released for order {0}")]
    AlreadySettled(OrderId),

    /// A stored value could not be decoded into its record type.
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

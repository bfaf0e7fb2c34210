use async_trait::async_trait;
use chrono::Utc;
use common::{BookId, OrderId};

use crate::records::{
    BookRecord, BookStatus, OrderRecord, OrderState, PaymentEventRecord, SettlementRecord,
    TransitionRecord, Version,
};
use crate::{LedgerError, Result};

/// A compare-and-swap on a book's status, applied inside an order commit.
#[derive(Debug, Clone)]
pub struct BookStatusChange {
    /// The book to update.
    pub book_id: BookId,

    /// Status the book must currently have.
    pub expected: BookStatus,

    /// Status to set.
    pub next: BookStatus,
}

/// One transactional order write.
///
/// Bundles everything a single state transition may touch: the order row
/// itself (guarded by the version counter), an optional book status change,
/// an optional settlement row, and the transition audit row. The store
/// applies the whole write atomically or not at all.
#[derive(Debug, Clone)]
pub struct OrderWrite {
    /// The full order row to persist. Its version is already bumped past
    /// `expected_version`.
    pub order: OrderRecord,

    /// Version the stored row must currently have.
    pub expected_version: Version,

    /// Book status change to apply in the same transaction, if any.
    pub book: Option<BookStatusChange>,

    /// Settlement row to append in the same transaction, if any.
    pub settlement: Option<SettlementRecord>,

    /// Transition audit row, present whenever the state changed.
    pub transition: Option<TransitionRecord>,
}

impl OrderWrite {
    /// Starts a write from a loaded order row.
    ///
    /// Captures the loaded version as the concurrency guard, then bumps the
    /// row's version and refreshes its `updated_at`. The caller mutates the
    /// row (state, token, markers) before handing the write to the store.
    pub fn new(mut order: OrderRecord) -> Self {
        let expected_version = order.version;
        order.version = expected_version.next();
        order.updated_at = Utc::now();
        Self {
            order,
            expected_version,
            book: None,
            settlement: None,
            transition: None,
        }
    }

    /// Records the state transition from `from` to the row's current state.
    pub fn with_transition(mut self, from: OrderState) -> Self {
        self.transition = Some(TransitionRecord::new(self.order.id, Some(from), self.order.state));
        self
    }

    /// Adds a book status change to the transaction.
    pub fn with_book_status(mut self, book_id: BookId, expected: BookStatus, next: BookStatus) -> Self {
        self.book = Some(BookStatusChange {
            book_id,
            expected,
            next,
        });
        self
    }

    /// Adds a settlement row to the transaction.
    pub fn with_settlement(mut self, settlement: SettlementRecord) -> Self {
        self.settlement = Some(settlement);
        self
    }
}

/// Validates an order write before it is applied.
///
/// Catches writes assembled inconsistently by a caller; the store runs this
/// before opening a transaction.
pub fn validate_write(write: &OrderWrite) -> Result<()> {
    if write.order.version != write.expected_version.next() {
        return Err(LedgerError::Corrupt(format!(
            "order write version must be expected + 1, got {} with expected {}",
            write.order.version, write.expected_version
        )));
    }
    if let Some(ref t) = write.transition
        && t.order_id != write.order.id
    {
        return Err(LedgerError::Corrupt(
            "transition row must reference the written order".to_string(),
        ));
    }
    if let Some(ref s) = write.settlement
        && s.order_id != write.order.id
    {
        return Err(LedgerError::Corrupt(
            "settlement row must reference the written order".to_string(),
        ));
    }
    Ok(())
}

/// Core trait for ledger store implementations.
///
/// The ledger is the only authoritative mutable state in the core. Every
/// method is one transaction: effects are visible all at once or not at
/// all, and no intermediate state is observable to a concurrent caller.
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Inserts a new book listing.
    async fn insert_book(&self, book: BookRecord) -> Result<()>;

    /// Loads a book by id.
    async fn book(&self, id: BookId) -> Result<Option<BookRecord>>;

    /// Compare-and-swaps a book's status outside any order write.
    ///
    /// Used for listing withdrawal. Fails with `BookUnavailable` carrying
    /// the actual status if the expectation does not hold.
    async fn set_book_status(
        &self,
        id: BookId,
        expected: BookStatus,
        next: BookStatus,
    ) -> Result<()>;

    /// Atomically claims a listed book for a new order.
    ///
    /// Reads the book's status and, if `Listed`, sets it to `Reserved` and
    /// inserts the given order row plus its creation transition in the same
    /// transaction. Under contention exactly one concurrent call for the
    /// same book succeeds; the rest fail with `AlreadyReserved`.
    async fn reserve_book(&self, book_id: BookId, order: OrderRecord) -> Result<OrderRecord>;

    /// Loads an order by id.
    async fn order(&self, id: OrderId) -> Result<Option<OrderRecord>>;

    /// Applies one transactional order write.
    ///
    /// Fails with `Conflict` if the stored version does not match
    /// `expected_version`, and with `AlreadySettled` if the write would
    /// create a second `Released` settlement for the order. Returns the new
    /// version.
    async fn commit(&self, write: OrderWrite) -> Result<Version>;

    /// Persists a payment event.
    ///
    /// Fails with `DuplicatePaymentEvent` if an event with the same gateway
    /// transaction id already exists.
    async fn insert_payment_event(&self, event: PaymentEventRecord) -> Result<()>;

    /// Returns all payment events recorded for an order, oldest first.
    async fn payment_events_for_order(&self, order_id: OrderId)
    -> Result<Vec<PaymentEventRecord>>;

    /// Returns the `Released` settlement row for an order, if any.
    async fn released_settlement(&self, order_id: OrderId) -> Result<Option<SettlementRecord>>;

    /// Returns all settlement rows for an order, oldest first.
    async fn settlements_for_order(&self, order_id: OrderId) -> Result<Vec<SettlementRecord>>;

    /// Returns all orders currently in the given state.
    ///
    /// Used by the sweep passes; results carry no ordering guarantee.
    async fn orders_in_state(&self, state: OrderState) -> Result<Vec<OrderRecord>>;

    /// Returns the transition audit trail for an order, oldest first.
    async fn transitions_for_order(&self, order_id: OrderId) -> Result<Vec<TransitionRecord>>;
}

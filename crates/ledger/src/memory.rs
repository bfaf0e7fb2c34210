use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{BookId, OrderId};
use tokio::sync::Mutex;

use crate::{
    LedgerError, Result,
    records::{
        BookRecord, BookStatus, OrderRecord, OrderState, PaymentEventRecord, SettlementOutcome,
        SettlementRecord, TransitionRecord, Version,
    },
    store::{LedgerStore, OrderWrite, validate_write},
};

#[derive(Default)]
struct LedgerState {
    books: HashMap<BookId, BookRecord>,
    orders: HashMap<OrderId, OrderRecord>,
    payment_events: Vec<PaymentEventRecord>,
    settlements: Vec<SettlementRecord>,
    transitions: Vec<TransitionRecord>,
}

/// In-memory ledger implementation.
///
/// Every trait method runs as one critical section behind a single async
/// mutex, which gives each operation the serializable isolation the
/// contracts require. Provides the same interface as the PostgreSQL
/// implementation and backs the test suites and the default server binary.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl InMemoryLedger {
    /// Creates a new empty in-memory ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of payment events stored.
    pub async fn payment_event_count(&self) -> usize {
        self.state.lock().await.payment_events.len()
    }

    /// Returns the total number of settlement rows stored.
    pub async fn settlement_count(&self) -> usize {
        self.state.lock().await.settlements.len()
    }

    /// Clears all stored records.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.books.clear();
        state.orders.clear();
        state.payment_events.clear();
        state.settlements.clear();
        state.transitions.clear();
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn insert_book(&self, book: BookRecord) -> Result<()> {
        let mut state = self.state.lock().await;
        state.books.insert(book.id, book);
        Ok(())
    }

    async fn book(&self, id: BookId) -> Result<Option<BookRecord>> {
        let state = self.state.lock().await;
        Ok(state.books.get(&id).cloned())
    }

    async fn set_book_status(
        &self,
        id: BookId,
        expected: BookStatus,
        next: BookStatus,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let book = state
            .books
            .get_mut(&id)
            .ok_or(LedgerError::BookNotFound(id))?;

        if book.status != expected {
            return Err(LedgerError::BookUnavailable {
                book_id: id,
                status: book.status,
            });
        }

        book.status = next;
        book.updated_at = Utc::now();
        Ok(())
    }

    async fn reserve_book(&self, book_id: BookId, order: OrderRecord) -> Result<OrderRecord> {
        let mut state = self.state.lock().await;
        let book = state
            .books
            .get_mut(&book_id)
            .ok_or(LedgerError::BookNotFound(book_id))?;

        match book.status {
            BookStatus::Listed => {}
            BookStatus::Reserved => return Err(LedgerError::AlreadyReserved(book_id)),
            status => {
                return Err(LedgerError::BookUnavailable { book_id, status });
            }
        }

        book.status = BookStatus::Reserved;
        book.updated_at = Utc::now();

        state
            .transitions
            .push(TransitionRecord::new(order.id, None, order.state));
        state.orders.insert(order.id, order.clone());

        Ok(order)
    }

    async fn order(&self, id: OrderId) -> Result<Option<OrderRecord>> {
        let state = self.state.lock().await;
        Ok(state.orders.get(&id).cloned())
    }

    async fn commit(&self, write: OrderWrite) -> Result<Version> {
        validate_write(&write)?;

        let mut state = self.state.lock().await;

        let stored = state
            .orders
            .get(&write.order.id)
            .ok_or(LedgerError::OrderNotFound(write.order.id))?;

        if stored.version != write.expected_version {
            metrics::counter!("ledger_write_conflicts_total").increment(1);
            tracing::debug!(
                order_id = %write.order.id,
                expected = %write.expected_version,
                actual = %stored.version,
                "stale order write rejected"
            );
            return Err(LedgerError::Conflict {
                order_id: write.order.id,
                expected: write.expected_version,
                actual: stored.version,
            });
        }

        if let Some(ref change) = write.book {
            let book = state
                .books
                .get(&change.book_id)
                .ok_or(LedgerError::BookNotFound(change.book_id))?;
            if book.status != change.expected {
                return Err(LedgerError::BookUnavailable {
                    book_id: change.book_id,
                    status: book.status,
                });
            }
        }

        if let Some(ref settlement) = write.settlement
            && settlement.outcome == SettlementOutcome::Released
            && state
                .settlements
                .iter()
                .any(|s| s.order_id == settlement.order_id && s.outcome == SettlementOutcome::Released)
        {
            return Err(LedgerError::AlreadySettled(settlement.order_id));
        }

        // All checks passed; apply the whole write.
        if let Some(change) = write.book {
            let book = state
                .books
                .get_mut(&change.book_id)
                .expect("book existence checked above");
            book.status = change.next;
            book.updated_at = Utc::now();
        }
        if let Some(settlement) = write.settlement {
            state.settlements.push(settlement);
        }
        if let Some(transition) = write.transition {
            state.transitions.push(transition);
        }

        let new_version = write.order.version;
        state.orders.insert(write.order.id, write.order);

        Ok(new_version)
    }

    async fn insert_payment_event(&self, event: PaymentEventRecord) -> Result<()> {
        let mut state = self.state.lock().await;

        if state
            .payment_events
            .iter()
            .any(|e| e.gateway_txn_id == event.gateway_txn_id)
        {
            return Err(LedgerError::DuplicatePaymentEvent {
                gateway_txn_id: event.gateway_txn_id,
            });
        }

        state.payment_events.push(event);
        Ok(())
    }

    async fn payment_events_for_order(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<PaymentEventRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .payment_events
            .iter()
            .filter(|e| e.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn released_settlement(&self, order_id: OrderId) -> Result<Option<SettlementRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .settlements
            .iter()
            .find(|s| s.order_id == order_id && s.outcome == SettlementOutcome::Released)
            .cloned())
    }

    async fn settlements_for_order(&self, order_id: OrderId) -> Result<Vec<SettlementRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .settlements
            .iter()
            .filter(|s| s.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn orders_in_state(&self, state_filter: OrderState) -> Result<Vec<OrderRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .values()
            .filter(|o| o.state == state_filter)
            .cloned()
            .collect())
    }

    async fn transitions_for_order(&self, order_id: OrderId) -> Result<Vec<TransitionRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .transitions
            .iter()
            .filter(|t| t.order_id == order_id)
            .cloned()
            .collect())
    }
}

//! Outbound collaborator traits and in-memory implementations.
//!
//! Both collaborators are fire-and-forget: the engine logs delivery
//! failures and never lets them block or roll back a committed transition.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::BookId;
use ledger::{BookStatus, TransitionRecord};
use thiserror::Error;

/// Delivery failure reported by a collaborator.
#[derive(Debug, Error)]
#[error("delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// Trait for the notification dispatcher.
///
/// Receives one event per committed order state transition.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers a transition event to buyer and seller.
    async fn order_transitioned(&self, transition: TransitionRecord) -> Result<(), DeliveryError>;
}

/// Trait for the listing/catalog service.
///
/// Receives the new status whenever the core mutates a book row.
#[async_trait]
pub trait CatalogSink: Send + Sync {
    /// Reports a book status change to the catalog.
    async fn book_status_changed(
        &self,
        book_id: BookId,
        status: BookStatus,
    ) -> Result<(), DeliveryError>;
}

#[derive(Debug, Default)]
struct InMemoryNotifierState {
    delivered: Vec<TransitionRecord>,
    fail_on_deliver: bool,
}

/// In-memory notifier for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    state: Arc<RwLock<InMemoryNotifierState>>,
}

impl InMemoryNotifier {
    /// Creates a new in-memory notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the notifier to fail deliveries.
    pub fn set_fail_on_deliver(&self, fail: bool) {
        self.state.write().unwrap().fail_on_deliver = fail;
    }

    /// Returns the number of delivered transition events.
    pub fn delivered_count(&self) -> usize {
        self.state.read().unwrap().delivered.len()
    }

    /// Returns a copy of all delivered transition events.
    pub fn delivered(&self) -> Vec<TransitionRecord> {
        self.state.read().unwrap().delivered.clone()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn order_transitioned(&self, transition: TransitionRecord) -> Result<(), DeliveryError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_deliver {
            return Err(DeliveryError("dispatcher unreachable".to_string()));
        }

        state.delivered.push(transition);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemoryCatalogState {
    changes: Vec<(BookId, BookStatus)>,
    fail_on_deliver: bool,
}

/// In-memory catalog sink for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalogSink {
    state: Arc<RwLock<InMemoryCatalogState>>,
}

impl InMemoryCatalogSink {
    /// Creates a new in-memory catalog sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the sink to fail deliveries.
    pub fn set_fail_on_deliver(&self, fail: bool) {
        self.state.write().unwrap().fail_on_deliver = fail;
    }

    /// Returns the number of recorded status changes.
    pub fn change_count(&self) -> usize {
        self.state.read().unwrap().changes.len()
    }

    /// Returns the last recorded status for a book, if any.
    pub fn last_status(&self, book_id: BookId) -> Option<BookStatus> {
        self.state
            .read()
            .unwrap()
            .changes
            .iter()
            .rev()
            .find(|(id, _)| *id == book_id)
            .map(|(_, status)| *status)
    }
}

#[async_trait]
impl CatalogSink for InMemoryCatalogSink {
    async fn book_status_changed(
        &self,
        book_id: BookId,
        status: BookStatus,
    ) -> Result<(), DeliveryError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_deliver {
            return Err(DeliveryError("catalog unreachable".to_string()));
        }

        state.changes.push((book_id, status));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::OrderId;
    use ledger::OrderState;

    #[tokio::test]
    async fn notifier_records_deliveries() {
        let notifier = InMemoryNotifier::new();
        let order_id = OrderId::new();

        notifier
            .order_transitioned(TransitionRecord::new(
                order_id,
                Some(OrderState::PendingPayment),
                OrderState::Paid,
            ))
            .await
            .unwrap();

        assert_eq!(notifier.delivered_count(), 1);
        assert_eq!(notifier.delivered()[0].order_id, order_id);
    }

    #[tokio::test]
    async fn notifier_fail_toggle() {
        let notifier = InMemoryNotifier::new();
        notifier.set_fail_on_deliver(true);

        let result = notifier
            .order_transitioned(TransitionRecord::new(
                OrderId::new(),
                None,
                OrderState::PendingPayment,
            ))
            .await;

        assert!(result.is_err());
        assert_eq!(notifier.delivered_count(), 0);
    }

    #[tokio::test]
    async fn catalog_sink_tracks_last_status() {
        let sink = InMemoryCatalogSink::new();
        let book_id = BookId::new();

        sink.book_status_changed(book_id, BookStatus::Reserved)
            .await
            .unwrap();
        sink.book_status_changed(book_id, BookStatus::Listed)
            .await
            .unwrap();

        assert_eq!(sink.change_count(), 2);
        assert_eq!(sink.last_status(book_id), Some(BookStatus::Listed));
        assert_eq!(sink.last_status(BookId::new()), None);
    }
}

//! Inventory guard enforcing single ownership of a book.

use common::{BookId, UserId};
use ledger::{LedgerStore, OrderRecord};

use crate::error::EngineError;

/// Enforces at-most-one-active-order-per-book across concurrent order
/// attempts.
///
/// The claim itself is one atomic ledger operation: the book's status is
/// read and, if `Listed`, flipped to `Reserved` while the owning order row
/// is inserted in the same transaction. Under contention exactly one
/// concurrent caller for the same book wins; the rest observe
/// `AlreadyReserved`. Release happens only through the order engine's
/// cancel and refund paths, which revert the book status in the same
/// transaction as the order state write.
#[derive(Clone)]
pub struct InventoryGuard<L> {
    ledger: L,
}

impl<L: LedgerStore> InventoryGuard<L> {
    /// Creates a new inventory guard over the given ledger.
    pub fn new(ledger: L) -> Self {
        Self { ledger }
    }

    /// Atomically claims a listed book for a new order.
    ///
    /// Fails with `OwnListing` when the buyer is the listing's seller,
    /// `AlreadyReserved` when another active order holds the claim, and
    /// `BookUnavailable` when the book is sold or withdrawn.
    #[tracing::instrument(skip(self))]
    pub async fn try_reserve(
        &self,
        book_id: BookId,
        buyer_id: UserId,
        meetup_location: &str,
    ) -> Result<OrderRecord, EngineError> {
        let book = self
            .ledger
            .book(book_id)
            .await?
            .ok_or(EngineError::BookNotFound(book_id))?;

        if book.seller_id == buyer_id {
            return Err(EngineError::OwnListing);
        }

        let order = OrderRecord::new(&book, buyer_id, meetup_location);
        let order = self.ledger.reserve_book(book_id, order).await?;

        metrics::counter!("reservations_total").increment(1);
        tracing::info!(%book_id, order_id = %order.id, "book reserved");

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Money;
    use ledger::{BookRecord, BookStatus, ConditionGrade, InMemoryLedger, OrderState};

    async fn listed_book(ledger: &InMemoryLedger) -> BookRecord {
        let book = BookRecord::new(
            "978-0135957059",
            "The Pragmatic Programmer",
            ConditionGrade::Annotated,
            Money::from_cents(3500),
            UserId::new(),
        );
        ledger.insert_book(book.clone()).await.unwrap();
        book
    }

    #[tokio::test]
    async fn reserve_creates_pending_order() {
        let ledger = InMemoryLedger::new();
        let book = listed_book(&ledger).await;
        let guard = InventoryGuard::new(ledger.clone());

        let buyer = UserId::new();
        let order = guard
            .try_reserve(book.id, buyer, "physics building lobby")
            .await
            .unwrap();

        assert_eq!(order.state, OrderState::PendingPayment);
        assert_eq!(order.buyer_id, buyer);
        assert_eq!(order.seller_id, book.seller_id);
        assert_eq!(order.price, book.price);

        let book = ledger.book(book.id).await.unwrap().unwrap();
        assert_eq!(book.status, BookStatus::Reserved);
    }

    #[tokio::test]
    async fn second_buyer_is_rejected() {
        let ledger = InMemoryLedger::new();
        let book = listed_book(&ledger).await;
        let guard = InventoryGuard::new(ledger);

        guard
            .try_reserve(book.id, UserId::new(), "physics building lobby")
            .await
            .unwrap();

        let result = guard
            .try_reserve(book.id, UserId::new(), "library steps")
            .await;
        assert!(matches!(result, Err(EngineError::AlreadyReserved(_))));
    }

    #[tokio::test]
    async fn seller_cannot_reserve_own_listing() {
        let ledger = InMemoryLedger::new();
        let book = listed_book(&ledger).await;
        let guard = InventoryGuard::new(ledger);

        let result = guard
            .try_reserve(book.id, book.seller_id, "physics building lobby")
            .await;
        assert!(matches!(result, Err(EngineError::OwnListing)));
    }

    #[tokio::test]
    async fn unknown_book_is_rejected() {
        let ledger = InMemoryLedger::new();
        let guard = InventoryGuard::new(ledger);

        let result = guard
            .try_reserve(BookId::new(), UserId::new(), "library steps")
            .await;
        assert!(matches!(result, Err(EngineError::BookNotFound(_))));
    }

    #[tokio::test]
    async fn concurrent_reserves_have_exactly_one_winner() {
        let ledger = InMemoryLedger::new();
        let book = listed_book(&ledger).await;
        let guard = InventoryGuard::new(ledger);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let guard = guard.clone();
            let book_id = book.id;
            handles.push(tokio::spawn(async move {
                guard.try_reserve(book_id, UserId::new(), "gym entrance").await
            }));
        }

        let mut winners = 0;
        let mut losers = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(EngineError::AlreadyReserved(_)) => losers += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(winners, 1);
        assert_eq!(losers, 9);
    }
}

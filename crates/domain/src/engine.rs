//! The order state machine.
//!
//! Every state change in the system goes through [`OrderEngine`]: it
//! validates the requested transition against the central legal-edge table,
//! bundles the order write with its side effects (book status change,
//! settlement row, transition audit row) into one ledger transaction, and
//! retries with a fresh read when a concurrent writer wins the version race.

use common::{BookId, Money, OrderId, UserId};
use ledger::{
    BookRecord, BookStatus, ConditionGrade, LedgerError, LedgerStore, OrderRecord, OrderState,
    OrderWrite, SettlementRecord, TransitionRecord,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;
use crate::guard::InventoryGuard;
use crate::notify::{CatalogSink, Notifier};

/// Write attempts per transition before a conflict is surfaced.
const MAX_WRITE_ATTEMPTS: u32 = 3;

/// Arbitration outcome for a disputed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeResolution {
    /// The handoff stands; the order returns to Delivered and settles.
    Release,

    /// The buyer is made whole; the order ends Refunded.
    Refund,
}

/// Side effects committed together with an order write.
struct Effects {
    book: Option<(BookStatus, BookStatus)>,
    settlement: Option<SettlementRecord>,
}

impl Effects {
    fn none() -> Self {
        Self {
            book: None,
            settlement: None,
        }
    }

    fn book(expected: BookStatus, next: BookStatus) -> Self {
        Self {
            book: Some((expected, next)),
            settlement: None,
        }
    }

    fn with_settlement(mut self, settlement: SettlementRecord) -> Self {
        self.settlement = Some(settlement);
        self
    }
}

fn ensure(order: &OrderRecord, next: OrderState, action: &'static str) -> Result<(), EngineError> {
    if order.state.can_transition_to(next) {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition {
            state: order.state,
            action,
        })
    }
}

fn mint_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Drives orders through their lifecycle.
#[derive(Clone)]
pub struct OrderEngine<L, N, C> {
    ledger: L,
    guard: InventoryGuard<L>,
    notifier: N,
    catalog: C,
}

impl<L, N, C> OrderEngine<L, N, C>
where
    L: LedgerStore + Clone,
    N: Notifier,
    C: CatalogSink,
{
    /// Creates a new order engine over the given ledger and collaborators.
    pub fn new(ledger: L, notifier: N, catalog: C) -> Self {
        let guard = InventoryGuard::new(ledger.clone());
        Self {
            ledger,
            guard,
            notifier,
            catalog,
        }
    }

    /// Returns a reference to the inventory guard.
    pub fn guard(&self) -> &InventoryGuard<L> {
        &self.guard
    }

    // -- Listing management --

    /// Creates a new listed book.
    #[tracing::instrument(skip(self, isbn, title))]
    pub async fn list_book(
        &self,
        isbn: impl Into<String>,
        title: impl Into<String>,
        condition: ConditionGrade,
        price: Money,
        seller_id: UserId,
    ) -> Result<BookRecord, EngineError> {
        if !price.is_positive() {
            return Err(EngineError::InvalidPrice(price));
        }

        let book = BookRecord::new(isbn, title, condition, price, seller_id);
        self.ledger.insert_book(book.clone()).await?;

        metrics::counter!("books_listed_total").increment(1);
        self.emit_book_status(book.id, BookStatus::Listed).await;

        Ok(book)
    }

    /// Withdraws a listed book.
    ///
    /// Only a `Listed` book can be withdrawn; a reserved or sold book is
    /// rejected with its current status.
    #[tracing::instrument(skip(self))]
    pub async fn withdraw_book(&self, book_id: BookId) -> Result<(), EngineError> {
        self.ledger
            .set_book_status(book_id, BookStatus::Listed, BookStatus::Withdrawn)
            .await?;

        self.emit_book_status(book_id, BookStatus::Withdrawn).await;
        Ok(())
    }

    // -- Order lifecycle --

    /// Places an order: claims the book through the inventory guard and
    /// creates the pending-payment order.
    #[tracing::instrument(skip(self))]
    pub async fn place_order(
        &self,
        book_id: BookId,
        buyer_id: UserId,
        meetup_location: &str,
    ) -> Result<OrderRecord, EngineError> {
        let order = self
            .guard
            .try_reserve(book_id, buyer_id, meetup_location)
            .await?;

        self.emit_transition(TransitionRecord::new(order.id, None, order.state))
            .await;
        self.emit_book_status(book_id, BookStatus::Reserved).await;

        Ok(order)
    }

    /// Confirms payment for an order.
    ///
    /// Driven only by the payment reconciler. The reported amount must
    /// match the agreed price exactly; a mismatch does not transition.
    #[tracing::instrument(skip(self))]
    pub async fn mark_paid(
        &self,
        order_id: OrderId,
        amount: Money,
    ) -> Result<OrderRecord, EngineError> {
        self.apply(order_id, |order| {
            ensure(order, OrderState::Paid, "confirm payment")?;
            if amount != order.price {
                return Err(EngineError::AmountMismatch {
                    expected: order.price,
                    actual: amount,
                });
            }
            order.state = OrderState::Paid;
            Ok(Effects::none())
        })
        .await
    }

    /// Confirms the scheduled meet-up and binds the handoff token.
    ///
    /// Informational: no money moves. The returned order carries the
    /// freshly bound token for the buyer's QR code.
    #[tracing::instrument(skip(self))]
    pub async fn confirm_meetup(&self, order_id: OrderId) -> Result<OrderRecord, EngineError> {
        self.apply(order_id, |order| {
            ensure(order, OrderState::AwaitingHandoff, "confirm meet-up")?;
            order.state = OrderState::AwaitingHandoff;
            order.handoff_token = Some(mint_token());
            Ok(Effects::none())
        })
        .await
    }

    /// Confirms receipt of the book via the scanned handoff token.
    ///
    /// This is the verifiable handoff event that binds the physical
    /// exchange to the state machine.
    #[tracing::instrument(skip(self, scanned_code))]
    pub async fn confirm_receipt(
        &self,
        order_id: OrderId,
        scanned_code: &str,
    ) -> Result<OrderRecord, EngineError> {
        self.apply(order_id, |order| {
            if order.state != OrderState::AwaitingHandoff {
                return Err(EngineError::InvalidTransition {
                    state: order.state,
                    action: "confirm receipt",
                });
            }
            match order.handoff_token.as_deref() {
                Some(token) if token == scanned_code => {}
                _ => return Err(EngineError::InvalidToken),
            }
            order.state = OrderState::Delivered;
            Ok(Effects::none())
        })
        .await
    }

    /// Records that the seller reports the handoff as done.
    ///
    /// The order stays AwaitingHandoff; the no-objection window counts
    /// from the first report and the sweep promotes the order to Delivered
    /// when it elapses.
    #[tracing::instrument(skip(self))]
    pub async fn report_delivery(&self, order_id: OrderId) -> Result<OrderRecord, EngineError> {
        self.apply(order_id, |order| {
            if order.state != OrderState::AwaitingHandoff {
                return Err(EngineError::InvalidTransition {
                    state: order.state,
                    action: "report delivery",
                });
            }
            if order.seller_reported_at.is_none() {
                order.seller_reported_at = Some(chrono::Utc::now());
            }
            Ok(Effects::none())
        })
        .await
    }

    /// Promotes a seller-reported handoff to Delivered.
    ///
    /// Called by the sweep once the no-objection window has elapsed; the
    /// window arithmetic lives with the sweep configuration.
    #[tracing::instrument(skip(self))]
    pub async fn promote_reported_delivery(
        &self,
        order_id: OrderId,
    ) -> Result<OrderRecord, EngineError> {
        self.apply(order_id, |order| {
            if order.state != OrderState::AwaitingHandoff || order.seller_reported_at.is_none() {
                return Err(EngineError::InvalidTransition {
                    state: order.state,
                    action: "promote reported delivery",
                });
            }
            order.state = OrderState::Delivered;
            Ok(Effects::none())
        })
        .await
    }

    /// Cancels an order before handoff and releases the book claim in the
    /// same transaction.
    ///
    /// A cancel competes under the same optimistic-concurrency rule as any
    /// other transition; it is not a privileged interrupt.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(
        &self,
        order_id: OrderId,
        reason: &str,
    ) -> Result<OrderRecord, EngineError> {
        let order = self
            .apply(order_id, |order| {
                ensure(order, OrderState::Cancelled, "cancel")?;
                order.state = OrderState::Cancelled;
                Ok(Effects::book(BookStatus::Reserved, BookStatus::Listed))
            })
            .await?;

        tracing::info!(%order_id, reason, "order cancelled");
        Ok(order)
    }

    /// Opens a dispute, freezing automatic settlement.
    #[tracing::instrument(skip(self))]
    pub async fn open_dispute(&self, order_id: OrderId) -> Result<OrderRecord, EngineError> {
        self.apply(order_id, |order| {
            ensure(order, OrderState::Disputed, "open dispute")?;
            order.state = OrderState::Disputed;
            Ok(Effects::none())
        })
        .await
    }

    /// Applies an external arbitration outcome to a disputed order.
    #[tracing::instrument(skip(self))]
    pub async fn resolve_dispute(
        &self,
        order_id: OrderId,
        resolution: DisputeResolution,
    ) -> Result<OrderRecord, EngineError> {
        self.apply(order_id, move |order| {
            if order.state != OrderState::Disputed {
                return Err(EngineError::InvalidTransition {
                    state: order.state,
                    action: "resolve dispute",
                });
            }
            match resolution {
                DisputeResolution::Release => {
                    order.state = OrderState::Delivered;
                    Ok(Effects::none())
                }
                DisputeResolution::Refund => {
                    order.state = OrderState::Refunded;
                    Ok(Effects::book(BookStatus::Reserved, BookStatus::Listed))
                }
            }
        })
        .await
    }

    /// Applies a gateway-confirmed refund.
    ///
    /// From Paid or Disputed the book claim is released back to Listed.
    /// From Settled (the reconciler has already checked the dispute
    /// window) a `Reversed` settlement row is appended and the archived
    /// book is relisted.
    #[tracing::instrument(skip(self))]
    pub async fn mark_refunded(&self, order_id: OrderId) -> Result<OrderRecord, EngineError> {
        self.apply(order_id, |order| {
            ensure(order, OrderState::Refunded, "refund")?;
            let effects = match order.state {
                OrderState::Settled => Effects::book(BookStatus::Sold, BookStatus::Listed)
                    .with_settlement(SettlementRecord::reversed(order.id, order.price)),
                _ => Effects::book(BookStatus::Reserved, BookStatus::Listed),
            };
            order.state = OrderState::Refunded;
            Ok(effects)
        })
        .await
    }

    /// Commits a settlement: the `Released` row, the Delivered → Settled
    /// transition, and the book archival, atomically.
    ///
    /// Replaying after success observes `AlreadySettled` and writes
    /// nothing.
    #[tracing::instrument(skip(self))]
    pub async fn mark_settled(&self, order_id: OrderId) -> Result<OrderRecord, EngineError> {
        self.apply(order_id, |order| {
            if order.state == OrderState::Settled {
                return Err(EngineError::AlreadySettled(order.id));
            }
            ensure(order, OrderState::Settled, "settle")?;
            let settlement = SettlementRecord::released(order.id, order.price);
            order.state = OrderState::Settled;
            order.settlement_failed = false;
            Ok(Effects::book(BookStatus::Reserved, BookStatus::Sold).with_settlement(settlement))
        })
        .await
    }

    /// Flags an order whose payout attempts were exhausted.
    ///
    /// The order stays Delivered with the settlement-failure marker set and
    /// a `Withheld` settlement row for the audit trail; an operator takes
    /// it from there.
    #[tracing::instrument(skip(self))]
    pub async fn mark_settlement_failed(
        &self,
        order_id: OrderId,
    ) -> Result<OrderRecord, EngineError> {
        self.apply(order_id, |order| {
            if order.state != OrderState::Delivered {
                return Err(EngineError::InvalidTransition {
                    state: order.state,
                    action: "flag settlement failure",
                });
            }
            order.settlement_failed = true;
            Ok(Effects::none()
                .with_settlement(SettlementRecord::withheld(order.id, order.price)))
        })
        .await
    }

    // -- Reads --

    /// Loads a book by id.
    pub async fn book(&self, book_id: BookId) -> Result<Option<BookRecord>, EngineError> {
        Ok(self.ledger.book(book_id).await?)
    }

    /// Loads an order by id.
    pub async fn order(&self, order_id: OrderId) -> Result<Option<OrderRecord>, EngineError> {
        Ok(self.ledger.order(order_id).await?)
    }

    /// Returns the transition audit trail for an order, oldest first.
    pub async fn history(&self, order_id: OrderId) -> Result<Vec<TransitionRecord>, EngineError> {
        Ok(self.ledger.transitions_for_order(order_id).await?)
    }

    // -- Internals --

    /// Loads the order, applies `mutate`, and commits the bundled write,
    /// retrying with a fresh read when a concurrent writer wins.
    async fn apply<F>(&self, order_id: OrderId, mutate: F) -> Result<OrderRecord, EngineError>
    where
        F: Fn(&mut OrderRecord) -> Result<Effects, EngineError>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let mut order = self
                .ledger
                .order(order_id)
                .await?
                .ok_or(EngineError::OrderNotFound(order_id))?;
            let from = order.state;

            let effects = mutate(&mut order)?;
            let book_id = order.book_id;
            let changed = order.state != from;

            let mut write = OrderWrite::new(order);
            if changed {
                write = write.with_transition(from);
            }
            if let Some((expected, next)) = effects.book {
                write = write.with_book_status(book_id, expected, next);
            }
            if let Some(settlement) = effects.settlement {
                write = write.with_settlement(settlement);
            }

            let transition = write.transition.clone();
            let book_next = write.book.as_ref().map(|b| (b.book_id, b.next));
            let committed = write.order.clone();

            match self.ledger.commit(write).await {
                Ok(_) => {
                    if let Some(t) = transition {
                        self.emit_transition(t).await;
                    }
                    if let Some((book_id, status)) = book_next {
                        self.emit_book_status(book_id, status).await;
                    }
                    return Ok(committed);
                }
                Err(LedgerError::Conflict { .. }) if attempt < MAX_WRITE_ATTEMPTS => {
                    tracing::debug!(%order_id, attempt, "write conflict, retrying with fresh read");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Fire-and-forget transition event; delivery failure never blocks.
    async fn emit_transition(&self, transition: TransitionRecord) {
        metrics::counter!(
            "order_transitions_total",
            "to" => transition.to.as_str()
        )
        .increment(1);

        if let Err(e) = self.notifier.order_transitioned(transition.clone()).await {
            tracing::warn!(
                order_id = %transition.order_id,
                to = %transition.to,
                error = %e,
                "notification delivery failed"
            );
        }
    }

    /// Fire-and-forget catalog update; delivery failure never blocks.
    async fn emit_book_status(&self, book_id: BookId, status: BookStatus) {
        if let Err(e) = self.catalog.book_status_changed(book_id, status).await {
            tracing::warn!(%book_id, %status, error = %e, "catalog delivery failed");
        }
    }
}

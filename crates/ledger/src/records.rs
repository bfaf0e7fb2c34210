//! Row types stored in the ledger.

use chrono::{DateTime, Utc};
use common::{BookId, Money, OrderId, PaymentEventId, UserId};
use serde::{Deserialize, Serialize};

/// Version number for an order row, used for optimistic concurrency control.
///
/// Versions start at 1 when the order is created and increment by 1 on
/// every successful write.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the first version (1) assigned at order creation.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// Condition grade of a listed book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionGrade {
    New,
    LikeNew,
    Annotated,
}

impl ConditionGrade {
    /// Returns the grade as its wire/storage string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionGrade::New => "NEW",
            ConditionGrade::LikeNew => "LIKE_NEW",
            ConditionGrade::Annotated => "ANNOTATED",
        }
    }

    /// Parses a grade from its storage string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NEW" => Some(ConditionGrade::New),
            "LIKE_NEW" => Some(ConditionGrade::LikeNew),
            "ANNOTATED" => Some(ConditionGrade::Annotated),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConditionGrade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a book listing.
///
/// Only the inventory guard and the order engine mutate this field, and
/// always inside a ledger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookStatus {
    /// Available for reservation.
    Listed,

    /// Claimed by exactly one active order.
    Reserved,

    /// Sale settled; the listing is archived.
    Sold,

    /// Withdrawn by the seller; the listing is soft-deleted.
    Withdrawn,
}

impl BookStatus {
    /// Returns the status as its wire/storage string.
    pub fn as_str(&self) -> &'static str {
        match self {
            BookStatus::Listed => "LISTED",
            BookStatus::Reserved => "RESERVED",
            BookStatus::Sold => "SOLD",
            BookStatus::Withdrawn => "WITHDRAWN",
        }
    }

    /// Parses a status from its storage string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LISTED" => Some(BookStatus::Listed),
            "RESERVED" => Some(BookStatus::Reserved),
            "SOLD" => Some(BookStatus::Sold),
            "WITHDRAWN" => Some(BookStatus::Withdrawn),
            _ => None,
        }
    }
}

impl std::fmt::Display for BookStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The state of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// PendingPayment ──► Paid ──► AwaitingHandoff ──► Delivered ──► Settled
///       │             │             │                │            │
///       │             │             ├──► Disputed ◄──┤            │ (refund window)
///       │             │             │       │                     ▼
///       └─────────────┴──► Cancelled│       ├──► Delivered     Refunded
///                                   │       └──► Refunded
///                                   │
///                     Paid ─────────┴──► Refunded
/// ```
///
/// `Settled`, `Cancelled`, and `Refunded` are terminal for the book claim;
/// the single edge out of `Settled` is the explicitly modeled refund
/// reversal, accepted only inside the configured dispute window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    /// Order created, book claimed, awaiting a successful payment.
    #[default]
    PendingPayment,

    /// Payment confirmed and held in escrow.
    Paid,

    /// Meet-up confirmed; the handoff token is bound in this state.
    AwaitingHandoff,

    /// Handoff confirmed; awaiting settlement.
    Delivered,

    /// A party flagged non-delivery or mismatch; settlement is frozen.
    Disputed,

    /// Funds released to the seller.
    Settled,

    /// Order cancelled before handoff; the book claim was released.
    Cancelled,

    /// Payment returned to the buyer.
    Refunded,
}

impl OrderState {
    /// Returns true if `next` is a legal transition target from this state.
    ///
    /// This is the single legal-edge table; every write path validates
    /// against it before committing.
    pub fn can_transition_to(&self, next: OrderState) -> bool {
        use OrderState::*;
        matches!(
            (self, next),
            (PendingPayment, Paid)
                | (PendingPayment, Cancelled)
                | (Paid, AwaitingHandoff)
                | (Paid, Cancelled)
                | (Paid, Refunded)
                | (AwaitingHandoff, Delivered)
                | (AwaitingHandoff, Disputed)
                | (Delivered, Settled)
                | (Delivered, Disputed)
                | (Disputed, Delivered)
                | (Disputed, Refunded)
                | (Settled, Refunded)
        )
    }

    /// Returns true if the order still holds its book claim.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if this is a terminal state for the book claim.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Settled | OrderState::Cancelled | OrderState::Refunded
        )
    }

    /// Returns true if a party may cancel the order in this state.
    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderState::PendingPayment | OrderState::Paid)
    }

    /// Returns true if a party may open a dispute in this state.
    pub fn can_dispute(&self) -> bool {
        matches!(self, OrderState::AwaitingHandoff | OrderState::Delivered)
    }

    /// Returns the state as its wire/storage string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::PendingPayment => "PENDING_PAYMENT",
            OrderState::Paid => "PAID",
            OrderState::AwaitingHandoff => "AWAITING_HANDOFF",
            OrderState::Delivered => "DELIVERED",
            OrderState::Disputed => "DISPUTED",
            OrderState::Settled => "SETTLED",
            OrderState::Cancelled => "CANCELLED",
            OrderState::Refunded => "REFUNDED",
        }
    }

    /// Parses a state from its storage string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING_PAYMENT" => Some(OrderState::PendingPayment),
            "PAID" => Some(OrderState::Paid),
            "AWAITING_HANDOFF" => Some(OrderState::AwaitingHandoff),
            "DELIVERED" => Some(OrderState::Delivered),
            "DISPUTED" => Some(OrderState::Disputed),
            "SETTLED" => Some(OrderState::Settled),
            "CANCELLED" => Some(OrderState::Cancelled),
            "REFUNDED" => Some(OrderState::Refunded),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Gateway-reported outcome of a payment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentOutcome {
    Success,
    Failure,
    Refund,
}

impl PaymentOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentOutcome::Success => "SUCCESS",
            PaymentOutcome::Failure => "FAILURE",
            PaymentOutcome::Refund => "REFUND",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SUCCESS" => Some(PaymentOutcome::Success),
            "FAILURE" => Some(PaymentOutcome::Failure),
            "REFUND" => Some(PaymentOutcome::Refund),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a settlement attempt on an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementOutcome {
    /// Funds released to the seller. At most one per order.
    Released,

    /// Settlement withheld after payout attempts were exhausted.
    Withheld,

    /// A released settlement was reversed by an in-window refund.
    Reversed,
}

impl SettlementOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementOutcome::Released => "RELEASED",
            SettlementOutcome::Withheld => "WITHHELD",
            SettlementOutcome::Reversed => "REVERSED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RELEASED" => Some(SettlementOutcome::Released),
            "WITHHELD" => Some(SettlementOutcome::Withheld),
            "REVERSED" => Some(SettlementOutcome::Reversed),
            _ => None,
        }
    }
}

impl std::fmt::Display for SettlementOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A book listing row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookRecord {
    /// Unique book identifier.
    pub id: BookId,

    /// ISBN as supplied by the seller.
    pub isbn: String,

    /// Title as supplied by the seller.
    pub title: String,

    /// Condition grade.
    pub condition: ConditionGrade,

    /// Asking price. Must be positive.
    pub price: Money,

    /// The seller who owns the listing.
    pub seller_id: UserId,

    /// Current listing status.
    pub status: BookStatus,

    /// When the listing was created.
    pub created_at: DateTime<Utc>,

    /// When the row was last written.
    pub updated_at: DateTime<Utc>,
}

impl BookRecord {
    /// Creates a new listed book.
    pub fn new(
        isbn: impl Into<String>,
        title: impl Into<String>,
        condition: ConditionGrade,
        price: Money,
        seller_id: UserId,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: BookId::new(),
            isbn: isbn.into(),
            title: title.into(),
            condition,
            price,
            seller_id,
            status: BookStatus::Listed,
            created_at: now,
            updated_at: now,
        }
    }
}

/// An order row.
///
/// The seller id and price are denormalized from the book at creation so
/// the order survives later book mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    /// Unique order identifier.
    pub id: OrderId,

    /// The book this order holds a claim on.
    pub book_id: BookId,

    /// The buyer who placed the order.
    pub buyer_id: UserId,

    /// The seller, snapshotted from the book at creation.
    pub seller_id: UserId,

    /// Agreed price, snapshotted from the book at creation.
    pub price: Money,

    /// Agreed meet-up location.
    pub meetup_location: String,

    /// Current lifecycle state.
    pub state: OrderState,

    /// Handoff token bound when the order enters AwaitingHandoff.
    pub handoff_token: Option<String>,

    /// When the seller reported the handoff as done, if they have.
    /// The no-objection window counts from this instant.
    pub seller_reported_at: Option<DateTime<Utc>>,

    /// Set when payout attempts were exhausted; the order stays Delivered
    /// until an operator intervenes.
    pub settlement_failed: bool,

    /// When the order was created.
    pub created_at: DateTime<Utc>,

    /// When the row was last written.
    pub updated_at: DateTime<Utc>,

    /// Monotonic counter for optimistic concurrency.
    pub version: Version,
}

impl OrderRecord {
    /// Creates a new pending-payment order claiming the given book.
    pub fn new(book: &BookRecord, buyer_id: UserId, meetup_location: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: OrderId::new(),
            book_id: book.id,
            buyer_id,
            seller_id: book.seller_id,
            price: book.price,
            meetup_location: meetup_location.into(),
            state: OrderState::PendingPayment,
            handoff_token: None,
            seller_reported_at: None,
            settlement_failed: false,
            created_at: now,
            updated_at: now,
            version: Version::first(),
        }
    }
}

/// A payment-gateway callback, persisted before its effects are applied.
///
/// Immutable once stored; the gateway transaction id is the dedup key that
/// makes callback processing idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEventRecord {
    /// Unique identifier for this event row.
    pub id: PaymentEventId,

    /// External gateway transaction id. Unique across all events.
    pub gateway_txn_id: String,

    /// The order the callback refers to.
    pub order_id: OrderId,

    /// Amount reported by the gateway.
    pub amount: Money,

    /// Gateway-reported outcome.
    pub outcome: PaymentOutcome,

    /// When the callback was received.
    pub received_at: DateTime<Utc>,
}

impl PaymentEventRecord {
    /// Creates a new payment event.
    pub fn new(
        gateway_txn_id: impl Into<String>,
        order_id: OrderId,
        amount: Money,
        outcome: PaymentOutcome,
    ) -> Self {
        Self {
            id: PaymentEventId::new(),
            gateway_txn_id: gateway_txn_id.into(),
            order_id,
            amount,
            outcome,
            received_at: Utc::now(),
        }
    }
}

/// An append-only settlement audit row.
///
/// A reversal appends a new `Reversed` row rather than mutating the
/// original `Released` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementRecord {
    /// The order this settlement belongs to.
    pub order_id: OrderId,

    /// Amount released, withheld, or reversed.
    pub amount: Money,

    /// Settlement outcome.
    pub outcome: SettlementOutcome,

    /// When the row was written.
    pub settled_at: DateTime<Utc>,
}

impl SettlementRecord {
    /// Creates a released-funds settlement row.
    pub fn released(order_id: OrderId, amount: Money) -> Self {
        Self {
            order_id,
            amount,
            outcome: SettlementOutcome::Released,
            settled_at: Utc::now(),
        }
    }

    /// Creates a withheld-settlement row.
    pub fn withheld(order_id: OrderId, amount: Money) -> Self {
        Self {
            order_id,
            amount,
            outcome: SettlementOutcome::Withheld,
            settled_at: Utc::now(),
        }
    }

    /// Creates a reversal row for a previously released settlement.
    pub fn reversed(order_id: OrderId, amount: Money) -> Self {
        Self {
            order_id,
            amount,
            outcome: SettlementOutcome::Reversed,
            settled_at: Utc::now(),
        }
    }
}

/// An append-only record of one order state transition.
///
/// `from` is `None` for the creation row written when the inventory guard
/// claims the book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// The order that transitioned.
    pub order_id: OrderId,

    /// State before the transition.
    pub from: Option<OrderState>,

    /// State after the transition.
    pub to: OrderState,

    /// When the transition committed.
    pub at: DateTime<Utc>,
}

impl TransitionRecord {
    /// Creates a transition record stamped with the current time.
    pub fn new(order_id: OrderId, from: Option<OrderState>, to: OrderState) -> Self {
        Self {
            order_id,
            from,
            to,
            at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_ordering() {
        let v1 = Version::new(1);
        let v2 = Version::new(2);
        assert!(v1 < v2);
        assert_eq!(v1.next(), v2);
    }

    #[test]
    fn legal_transitions() {
        use OrderState::*;
        assert!(PendingPayment.can_transition_to(Paid));
        assert!(PendingPayment.can_transition_to(Cancelled));
        assert!(Paid.can_transition_to(AwaitingHandoff));
        assert!(Paid.can_transition_to(Cancelled));
        assert!(Paid.can_transition_to(Refunded));
        assert!(AwaitingHandoff.can_transition_to(Delivered));
        assert!(AwaitingHandoff.can_transition_to(Disputed));
        assert!(Delivered.can_transition_to(Settled));
        assert!(Delivered.can_transition_to(Disputed));
        assert!(Disputed.can_transition_to(Delivered));
        assert!(Disputed.can_transition_to(Refunded));
        assert!(Settled.can_transition_to(Refunded));
    }

    #[test]
    fn illegal_transitions() {
        use OrderState::*;
        assert!(!PendingPayment.can_transition_to(AwaitingHandoff));
        assert!(!PendingPayment.can_transition_to(Delivered));
        assert!(!PendingPayment.can_transition_to(Settled));
        assert!(!Paid.can_transition_to(Settled));
        assert!(!AwaitingHandoff.can_transition_to(Cancelled));
        assert!(!Delivered.can_transition_to(Cancelled));
        assert!(!Delivered.can_transition_to(Refunded));
        assert!(!Cancelled.can_transition_to(Paid));
        assert!(!Refunded.can_transition_to(Delivered));
        assert!(!Settled.can_transition_to(Delivered));
    }

    #[test]
    fn no_transition_to_self() {
        use OrderState::*;
        for state in [
            PendingPayment,
            Paid,
            AwaitingHandoff,
            Delivered,
            Disputed,
            Settled,
            Cancelled,
            Refunded,
        ] {
            assert!(!state.can_transition_to(state));
        }
    }

    #[test]
    fn terminal_states() {
        assert!(OrderState::Settled.is_terminal());
        assert!(OrderState::Cancelled.is_terminal());
        assert!(OrderState::Refunded.is_terminal());
        assert!(!OrderState::PendingPayment.is_terminal());
        assert!(!OrderState::Disputed.is_terminal());
        assert!(OrderState::Delivered.is_active());
    }

    #[test]
    fn cancel_only_before_handoff() {
        assert!(OrderState::PendingPayment.can_cancel());
        assert!(OrderState::Paid.can_cancel());
        assert!(!OrderState::AwaitingHandoff.can_cancel());
        assert!(!OrderState::Delivered.can_cancel());
        assert!(!OrderState::Settled.can_cancel());
    }

    #[test]
    fn dispute_only_around_handoff() {
        assert!(OrderState::AwaitingHandoff.can_dispute());
        assert!(OrderState::Delivered.can_dispute());
        assert!(!OrderState::PendingPayment.can_dispute());
        assert!(!OrderState::Paid.can_dispute());
        assert!(!OrderState::Settled.can_dispute());
    }

    #[test]
    fn state_string_roundtrip() {
        use OrderState::*;
        for state in [
            PendingPayment,
            Paid,
            AwaitingHandoff,
            Delivered,
            Disputed,
            Settled,
            Cancelled,
            Refunded,
        ] {
            assert_eq!(OrderState::parse(state.as_str()), Some(state));
        }
        assert_eq!(OrderState::parse("SHIPPED"), None);
    }

    #[test]
    fn status_and_outcome_string_roundtrip() {
        for status in [
            BookStatus::Listed,
            BookStatus::Reserved,
            BookStatus::Sold,
            BookStatus::Withdrawn,
        ] {
            assert_eq!(BookStatus::parse(status.as_str()), Some(status));
        }
        for outcome in [
            PaymentOutcome::Success,
            PaymentOutcome::Failure,
            PaymentOutcome::Refund,
        ] {
            assert_eq!(PaymentOutcome::parse(outcome.as_str()), Some(outcome));
        }
        for outcome in [
            SettlementOutcome::Released,
            SettlementOutcome::Withheld,
            SettlementOutcome::Reversed,
        ] {
            assert_eq!(SettlementOutcome::parse(outcome.as_str()), Some(outcome));
        }
        for grade in [
            ConditionGrade::New,
            ConditionGrade::LikeNew,
            ConditionGrade::Annotated,
        ] {
            assert_eq!(ConditionGrade::parse(grade.as_str()), Some(grade));
        }
    }

    #[test]
    fn state_serializes_as_wire_string() {
        let json = serde_json::to_string(&OrderState::AwaitingHandoff).unwrap();
        assert_eq!(json, "\"AWAITING_HANDOFF\"");
        let back: OrderState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, OrderState::AwaitingHandoff);
    }

    #[test]
    fn new_order_snapshots_book_fields() {
        let seller = UserId::new();
        let book = BookRecord::new(
            "978-0134685991",
            "Effective Java",
            ConditionGrade::LikeNew,
            Money::from_cents(5000),
            seller,
        );
        let buyer = UserId::new();
        let order = OrderRecord::new(&book, buyer, "library steps");

        assert_eq!(order.book_id, book.id);
        assert_eq!(order.seller_id, seller);
        assert_eq!(order.price, book.price);
        assert_eq!(order.state, OrderState::PendingPayment);
        assert_eq!(order.version, Version::first());
        assert!(order.handoff_token.is_none());
        assert!(!order.settlement_failed);
    }

    #[test]
    fn new_book_is_listed() {
        let book = BookRecord::new(
            "978-0134685991",
            "Effective Java",
            ConditionGrade::New,
            Money::from_cents(4500),
            UserId::new(),
        );
        assert_eq!(book.status, BookStatus::Listed);
    }
}

//! Shared types for the marketplace order and settlement core.

mod types;

pub use types::{BookId, Money, OrderId, PaymentEventId, UserId};

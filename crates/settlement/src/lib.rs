//! Payment reconciliation and settlement for the marketplace core.
//!
//! Two components sit between "order placed" and "funds released":
//! - PaymentReconciler consumes asynchronous payment-gateway callbacks
//!   idempotently and advances the order state machine
//! - SettlementScheduler releases funds to sellers after confirmed
//!   handoff, with retry, backoff, and sweep-driven timeout handling

pub mod config;
pub mod error;
pub mod gateway;
pub mod reconciler;
pub mod scheduler;

pub use config::SettlementConfig;
pub use error::SettlementError;
pub use gateway::{GatewayError, InMemoryPayoutGateway, PayoutGateway, PayoutReceipt};
pub use reconciler::PaymentReconciler;
pub use scheduler::{SettlementScheduler, SweepStats};

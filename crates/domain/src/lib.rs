//! Order lifecycle domain for the marketplace core.
//!
//! This crate provides:
//! - InventoryGuard enforcing single ownership of a book across concurrent
//!   order attempts
//! - OrderEngine driving every order state transition through one central
//!   legal-edge table, with bounded retry on write conflicts
//! - Collaborator traits for the notification dispatcher and the catalog,
//!   with in-memory doubles for tests

pub mod engine;
pub mod error;
pub mod guard;
pub mod notify;

pub use engine::{DisputeResolution, OrderEngine};
pub use error::EngineError;
pub use guard::InventoryGuard;
pub use notify::{
    CatalogSink, DeliveryError, InMemoryCatalogSink, InMemoryNotifier, Notifier,
};

pub mod error;
pub mod memory;
pub mod postgres;
pub mod records;
pub mod store;

pub use common::{BookId, Money, OrderId, PaymentEventId, UserId};
pub use error::{LedgerError, Result};
pub use memory::InMemoryLedger;
pub use postgres::PostgresLedger;
pub use records::{
    BookRecord, BookStatus, ConditionGrade, OrderRecord, OrderState, PaymentEventRecord,
    PaymentOutcome, SettlementOutcome, SettlementRecord, TransitionRecord, Version,
};
pub use store::{BookStatusChange, LedgerStore, OrderWrite};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{BookId, Money, OrderId, PaymentEventId, UserId};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    LedgerError, Result,
    records::{
        BookRecord, BookStatus, ConditionGrade, OrderRecord, OrderState, PaymentEventRecord,
        PaymentOutcome, SettlementOutcome, SettlementRecord, TransitionRecord, Version,
    },
    store::{LedgerStore, OrderWrite, validate_write},
};

/// PostgreSQL-backed ledger implementation.
///
/// Every trait method runs as a single SQL transaction; the order version
/// guard is the `WHERE version = $n` predicate on the update, and the
/// dedup/single-release rules are unique constraints mapped to typed errors.
#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    /// Creates a new PostgreSQL ledger.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_book(row: PgRow) -> Result<BookRecord> {
        let condition: String = row.try_get("condition")?;
        let status: String = row.try_get("status")?;

        Ok(BookRecord {
            id: BookId::from_uuid(row.try_get::<Uuid, _>("id")?),
            isbn: row.try_get("isbn")?,
            title: row.try_get("title")?,
            condition: ConditionGrade::parse(&condition)
                .ok_or_else(|| LedgerError::Corrupt(format!("unknown condition {condition}")))?,
            price: Money::from_cents(row.try_get("price_cents")?),
            seller_id: UserId::from_uuid(row.try_get::<Uuid, _>("seller_id")?),
            status: BookStatus::parse(&status)
                .ok_or_else(|| LedgerError::Corrupt(format!("unknown book status {status}")))?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_order(row: PgRow) -> Result<OrderRecord> {
        let state: String = row.try_get("state")?;

        Ok(OrderRecord {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            book_id: BookId::from_uuid(row.try_get::<Uuid, _>("book_id")?),
            buyer_id: UserId::from_uuid(row.try_get::<Uuid, _>("buyer_id")?),
            seller_id: UserId::from_uuid(row.try_get::<Uuid, _>("seller_id")?),
            price: Money::from_cents(row.try_get("price_cents")?),
            meetup_location: row.try_get("meetup_location")?,
            state: OrderState::parse(&state)
                .ok_or_else(|| LedgerError::Corrupt(format!("unknown order state {state}")))?,
            handoff_token: row.try_get("handoff_token")?,
            seller_reported_at: row.try_get("seller_reported_at")?,
            settlement_failed: row.try_get("settlement_failed")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            version: Version::new(row.try_get("version")?),
        })
    }

    fn row_to_payment_event(row: PgRow) -> Result<PaymentEventRecord> {
        let outcome: String = row.try_get("outcome")?;

        Ok(PaymentEventRecord {
            id: PaymentEventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            gateway_txn_id: row.try_get("gateway_txn_id")?,
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            amount: Money::from_cents(row.try_get("amount_cents")?),
            outcome: PaymentOutcome::parse(&outcome)
                .ok_or_else(|| LedgerError::Corrupt(format!("unknown outcome {outcome}")))?,
            received_at: row.try_get("received_at")?,
        })
    }

    fn row_to_settlement(row: PgRow) -> Result<SettlementRecord> {
        let outcome: String = row.try_get("outcome")?;

        Ok(SettlementRecord {
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            amount: Money::from_cents(row.try_get("amount_cents")?),
            outcome: SettlementOutcome::parse(&outcome)
                .ok_or_else(|| LedgerError::Corrupt(format!("unknown outcome {outcome}")))?,
            settled_at: row.try_get("settled_at")?,
        })
    }

    fn row_to_transition(row: PgRow) -> Result<TransitionRecord> {
        let from: Option<String> = row.try_get("from_state")?;
        let to: String = row.try_get("to_state")?;

        Ok(TransitionRecord {
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            from: match from {
                Some(s) => Some(
                    OrderState::parse(&s)
                        .ok_or_else(|| LedgerError::Corrupt(format!("unknown order state {s}")))?,
                ),
                None => None,
            },
            to: OrderState::parse(&to)
                .ok_or_else(|| LedgerError::Corrupt(format!("unknown order state {to}")))?,
            at: row.try_get::<DateTime<Utc>, _>("occurred_at")?,
        })
    }

    async fn insert_order_tx(
        tx: &mut sqlx::PgConnection,
        order: &OrderRecord,
    ) -> std::result::Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, book_id, buyer_id, seller_id, price_cents, meetup_location,
                                state, handoff_token, seller_reported_at, settlement_failed,
                                created_at, updated_at, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.book_id.as_uuid())
        .bind(order.buyer_id.as_uuid())
        .bind(order.seller_id.as_uuid())
        .bind(order.price.cents())
        .bind(&order.meetup_location)
        .bind(order.state.as_str())
        .bind(&order.handoff_token)
        .bind(order.seller_reported_at)
        .bind(order.settlement_failed)
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.version.as_i64())
        .execute(&mut *tx)
        .await?;
        Ok(())
    }

    async fn insert_transition_tx(
        tx: &mut sqlx::PgConnection,
        transition: &TransitionRecord,
    ) -> std::result::Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO order_transitions (order_id, from_state, to_state, occurred_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(transition.order_id.as_uuid())
        .bind(transition.from.map(|s| s.as_str()))
        .bind(transition.to.as_str())
        .bind(transition.at)
        .execute(&mut *tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PostgresLedger {
    async fn insert_book(&self, book: BookRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO books (id, isbn, title, condition, price_cents, seller_id, status,
                               created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(book.id.as_uuid())
        .bind(&book.isbn)
        .bind(&book.title)
        .bind(book.condition.as_str())
        .bind(book.price.cents())
        .bind(book.seller_id.as_uuid())
        .bind(book.status.as_str())
        .bind(book.created_at)
        .bind(book.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn book(&self, id: BookId) -> Result<Option<BookRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, isbn, title, condition, price_cents, seller_id, status,
                   created_at, updated_at
            FROM books
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_book).transpose()
    }

    async fn set_book_status(
        &self,
        id: BookId,
        expected: BookStatus,
        next: BookStatus,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE books SET status = $1, updated_at = $2 WHERE id = $3 AND status = $4",
        )
        .bind(next.as_str())
        .bind(Utc::now())
        .bind(id.as_uuid())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let status: Option<String> =
                sqlx::query_scalar("SELECT status FROM books WHERE id = $1")
                    .bind(id.as_uuid())
                    .fetch_optional(&self.pool)
                    .await?;

            return match status {
                None => Err(LedgerError::BookNotFound(id)),
                Some(s) => Err(LedgerError::BookUnavailable {
                    book_id: id,
                    status: BookStatus::parse(&s)
                        .ok_or_else(|| LedgerError::Corrupt(format!("unknown book status {s}")))?,
                }),
            };
        }

        Ok(())
    }

    async fn reserve_book(&self, book_id: BookId, order: OrderRecord) -> Result<OrderRecord> {
        let mut tx = self.pool.begin().await?;

        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM books WHERE id = $1 FOR UPDATE")
                .bind(book_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;

        let status = match status {
            None => return Err(LedgerError::BookNotFound(book_id)),
            Some(s) => BookStatus::parse(&s)
                .ok_or_else(|| LedgerError::Corrupt(format!("unknown book status {s}")))?,
        };

        match status {
            BookStatus::Listed => {}
            BookStatus::Reserved => return Err(LedgerError::AlreadyReserved(book_id)),
            other => {
                return Err(LedgerError::BookUnavailable {
                    book_id,
                    status: other,
                });
            }
        }

        sqlx::query("UPDATE books SET status = $1, updated_at = $2 WHERE id = $3")
            .bind(BookStatus::Reserved.as_str())
            .bind(Utc::now())
            .bind(book_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        Self::insert_order_tx(&mut tx, &order).await?;
        Self::insert_transition_tx(
            &mut tx,
            &TransitionRecord::new(order.id, None, order.state),
        )
        .await?;

        tx.commit().await?;
        Ok(order)
    }

    async fn order(&self, id: OrderId) -> Result<Option<OrderRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, book_id, buyer_id, seller_id, price_cents, meetup_location, state,
                   handoff_token, seller_reported_at, settlement_failed, created_at,
                   updated_at, version
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn commit(&self, write: OrderWrite) -> Result<Version> {
        validate_write(&write)?;

        let order = &write.order;
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET state = $1, handoff_token = $2, seller_reported_at = $3,
                settlement_failed = $4, updated_at = $5, version = $6
            WHERE id = $7 AND version = $8
            "#,
        )
        .bind(order.state.as_str())
        .bind(&order.handoff_token)
        .bind(order.seller_reported_at)
        .bind(order.settlement_failed)
        .bind(order.updated_at)
        .bind(order.version.as_i64())
        .bind(order.id.as_uuid())
        .bind(write.expected_version.as_i64())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let actual: Option<i64> = sqlx::query_scalar("SELECT version FROM orders WHERE id = $1")
                .bind(order.id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;

            return match actual {
                None => Err(LedgerError::OrderNotFound(order.id)),
                Some(v) => {
                    metrics::counter!("ledger_write_conflicts_total").increment(1);
                    tracing::debug!(
                        order_id = %order.id,
                        expected = %write.expected_version,
                        actual = v,
                        "stale order write rejected"
                    );
                    Err(LedgerError::Conflict {
                        order_id: order.id,
                        expected: write.expected_version,
                        actual: Version::new(v),
                    })
                }
            };
        }

        if let Some(ref change) = write.book {
            let result = sqlx::query(
                "UPDATE books SET status = $1, updated_at = $2 WHERE id = $3 AND status = $4",
            )
            .bind(change.next.as_str())
            .bind(Utc::now())
            .bind(change.book_id.as_uuid())
            .bind(change.expected.as_str())
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                let status: Option<String> =
                    sqlx::query_scalar("SELECT status FROM books WHERE id = $1")
                        .bind(change.book_id.as_uuid())
                        .fetch_optional(&mut *tx)
                        .await?;

                return match status {
                    None => Err(LedgerError::BookNotFound(change.book_id)),
                    Some(s) => Err(LedgerError::BookUnavailable {
                        book_id: change.book_id,
                        status: BookStatus::parse(&s).ok_or_else(|| {
                            LedgerError::Corrupt(format!("unknown book status {s}"))
                        })?,
                    }),
                };
            }
        }

        if let Some(ref settlement) = write.settlement {
            sqlx::query(
                r#"
                INSERT INTO settlements (order_id, amount_cents, outcome, settled_at)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(settlement.order_id.as_uuid())
            .bind(settlement.amount.cents())
            .bind(settlement.outcome.as_str())
            .bind(settlement.settled_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                // A second RELEASED row violates the partial unique index.
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("unique_released_settlement")
                {
                    return LedgerError::AlreadySettled(settlement.order_id);
                }
                LedgerError::Database(e)
            })?;
        }

        if let Some(ref transition) = write.transition {
            Self::insert_transition_tx(&mut tx, transition).await?;
        }

        tx.commit().await?;
        Ok(order.version)
    }

    async fn insert_payment_event(&self, event: PaymentEventRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payment_events (id, gateway_txn_id, order_id, amount_cents, outcome,
                                        received_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.id.as_uuid())
        .bind(&event.gateway_txn_id)
        .bind(event.order_id.as_uuid())
        .bind(event.amount.cents())
        .bind(event.outcome.as_str())
        .bind(event.received_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_gateway_txn_id")
            {
                return LedgerError::DuplicatePaymentEvent {
                    gateway_txn_id: event.gateway_txn_id.clone(),
                };
            }
            LedgerError::Database(e)
        })?;

        Ok(())
    }

    async fn payment_events_for_order(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<PaymentEventRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, gateway_txn_id, order_id, amount_cents, outcome, received_at
            FROM payment_events
            WHERE order_id = $1
            ORDER BY received_at ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_payment_event).collect()
    }

    async fn released_settlement(&self, order_id: OrderId) -> Result<Option<SettlementRecord>> {
        let row = sqlx::query(
            r#"
            SELECT order_id, amount_cents, outcome, settled_at
            FROM settlements
            WHERE order_id = $1 AND outcome = 'RELEASED'
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_settlement).transpose()
    }

    async fn settlements_for_order(&self, order_id: OrderId) -> Result<Vec<SettlementRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, amount_cents, outcome, settled_at
            FROM settlements
            WHERE order_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_settlement).collect()
    }

    async fn orders_in_state(&self, state: OrderState) -> Result<Vec<OrderRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, book_id, buyer_id, seller_id, price_cents, meetup_location, state,
                   handoff_token, seller_reported_at, settlement_failed, created_at,
                   updated_at, version
            FROM orders
            WHERE state = $1
            "#,
        )
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_order).collect()
    }

    async fn transitions_for_order(&self, order_id: OrderId) -> Result<Vec<TransitionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, from_state, to_state, occurred_at
            FROM order_transitions
            WHERE order_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_transition).collect()
    }
}

//! Payment reconciler: idempotent consumption of gateway callbacks.

use chrono::Utc;
use common::{Money, OrderId};
use domain::{CatalogSink, Notifier, OrderEngine};
use ledger::{
    LedgerError, LedgerStore, OrderRecord, OrderState, PaymentEventRecord, PaymentOutcome,
};

use crate::config::SettlementConfig;
use crate::error::{Result, SettlementError};

/// Matches asynchronous payment-gateway callbacks to orders and advances
/// the state machine.
///
/// The gateway delivers at-least-once, so every callback is persisted
/// under its gateway transaction id before any effect is applied; a
/// repeated id returns `AlreadyProcessed` and changes nothing.
#[derive(Clone)]
pub struct PaymentReconciler<L, N, C> {
    ledger: L,
    engine: OrderEngine<L, N, C>,
    config: SettlementConfig,
}

impl<L, N, C> PaymentReconciler<L, N, C>
where
    L: LedgerStore + Clone,
    N: Notifier,
    C: CatalogSink,
{
    /// Creates a new reconciler over the given ledger and engine.
    pub fn new(ledger: L, engine: OrderEngine<L, N, C>, config: SettlementConfig) -> Self {
        Self {
            ledger,
            engine,
            config,
        }
    }

    /// Handles one gateway callback.
    ///
    /// Returns the authoritative order record after any applied effect.
    #[tracing::instrument(skip(self))]
    pub async fn handle_callback(
        &self,
        gateway_txn_id: &str,
        order_id: OrderId,
        amount: Money,
        outcome: PaymentOutcome,
    ) -> Result<OrderRecord> {
        let order = self
            .ledger
            .order(order_id)
            .await?
            .ok_or(SettlementError::UnknownOrder(order_id))?;

        // Persist first; the transaction id is the dedup key.
        let event = PaymentEventRecord::new(gateway_txn_id, order_id, amount, outcome);
        match self.ledger.insert_payment_event(event).await {
            Ok(()) => {}
            Err(LedgerError::DuplicatePaymentEvent { gateway_txn_id }) => {
                metrics::counter!("payment_callbacks_deduped_total").increment(1);
                tracing::info!(%gateway_txn_id, %order_id, "duplicate callback ignored");
                return Err(SettlementError::AlreadyProcessed { gateway_txn_id });
            }
            Err(e) => return Err(e.into()),
        }

        metrics::counter!("payment_callbacks_total", "outcome" => outcome.as_str()).increment(1);

        match outcome {
            PaymentOutcome::Success => Ok(self.engine.mark_paid(order_id, amount).await?),
            PaymentOutcome::Failure => self.handle_failure(order).await,
            PaymentOutcome::Refund => self.handle_refund(order).await,
        }
    }

    /// A failed attempt leaves the order pending so the buyer may retry,
    /// until the failure ceiling auto-cancels it.
    async fn handle_failure(&self, order: OrderRecord) -> Result<OrderRecord> {
        let failures = self
            .ledger
            .payment_events_for_order(order.id)
            .await?
            .iter()
            .filter(|e| e.outcome == PaymentOutcome::Failure)
            .count();

        if order.state == OrderState::PendingPayment
            && failures >= self.config.payment_failure_ceiling as usize
        {
            tracing::info!(
                order_id = %order.id,
                failures,
                "payment failure ceiling reached, cancelling order"
            );
            return Ok(self.engine.cancel(order.id, "payment failure ceiling").await?);
        }

        Ok(order)
    }

    /// Routes a refund by the order's current state. A post-settlement
    /// refund is honored only inside the dispute window.
    async fn handle_refund(&self, order: OrderRecord) -> Result<OrderRecord> {
        if order.state == OrderState::Settled {
            let released = self
                .ledger
                .released_settlement(order.id)
                .await?
                .ok_or(SettlementError::AlreadySettled(order.id))?;

            let window = chrono::Duration::from_std(self.config.dispute_window)
                .unwrap_or_else(|_| chrono::Duration::max_value());
            if Utc::now() - released.settled_at > window {
                return Err(SettlementError::WindowExpired(order.id));
            }
        }

        Ok(self.engine.mark_refunded(order.id).await?)
    }
}

//! Settlement scheduler: releases funds after confirmed handoff.

use std::time::Duration;

use chrono::Utc;
use common::OrderId;
use domain::{CatalogSink, EngineError, Notifier, OrderEngine};
use ledger::{LedgerStore, OrderRecord, OrderState};

use crate::config::SettlementConfig;
use crate::error::{Result, SettlementError};
use crate::gateway::{GatewayError, PayoutGateway, PayoutReceipt};

/// Counts of transitions applied by one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Pending-payment orders cancelled by timeout.
    pub cancelled: usize,

    /// Seller-reported deliveries promoted after the no-objection window.
    pub promoted: usize,

    /// Delivered orders settled after the grace period.
    pub settled: usize,
}

/// Releases escrowed funds to sellers once handoff is confirmed.
///
/// Runs on explicit trigger (the buyer's receipt confirmation) and on a
/// periodic sweep that also drives the timeout-based transitions: payment
/// timeouts, no-objection delivery promotion, and graced settlement.
#[derive(Clone)]
pub struct SettlementScheduler<L, N, C, G> {
    ledger: L,
    engine: OrderEngine<L, N, C>,
    gateway: G,
    config: SettlementConfig,
}

impl<L, N, C, G> SettlementScheduler<L, N, C, G>
where
    L: LedgerStore + Clone,
    N: Notifier,
    C: CatalogSink,
    G: PayoutGateway,
{
    /// Creates a new scheduler over the given ledger, engine, and payout
    /// gateway.
    pub fn new(
        ledger: L,
        engine: OrderEngine<L, N, C>,
        gateway: G,
        config: SettlementConfig,
    ) -> Self {
        Self {
            ledger,
            engine,
            gateway,
            config,
        }
    }

    /// Settles one delivered order: pays the seller out, then commits the
    /// settlement row and the Delivered → Settled transition atomically.
    ///
    /// Replaying after success observes `AlreadySettled` and creates no
    /// additional settlement row. A crash between payout and commit is
    /// covered by the gateway keying payouts on the order id.
    #[tracing::instrument(skip(self))]
    pub async fn settle(&self, order_id: OrderId) -> Result<OrderRecord> {
        let order = self
            .ledger
            .order(order_id)
            .await?
            .ok_or(SettlementError::UnknownOrder(order_id))?;

        match order.state {
            OrderState::Delivered => {}
            OrderState::Settled => return Err(SettlementError::AlreadySettled(order_id)),
            OrderState::Disputed => return Err(SettlementError::Disputed(order_id)),
            state => {
                return Err(SettlementError::NotDeliveredYet { order_id, state });
            }
        }

        let started = std::time::Instant::now();
        let receipt = self.payout_with_backoff(&order).await?;

        match self.engine.mark_settled(order_id).await {
            Ok(order) => {
                metrics::counter!("settlements_released_total").increment(1);
                metrics::histogram!("settlement_duration_seconds")
                    .record(started.elapsed().as_secs_f64());
                tracing::info!(
                    %order_id,
                    payout_id = %receipt.payout_id,
                    amount = %order.price,
                    "funds released to seller"
                );
                Ok(order)
            }
            Err(EngineError::AlreadySettled(id)) => Err(SettlementError::AlreadySettled(id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Runs one sweep over timed-out and graced orders.
    ///
    /// Per-order failures are logged and never abort the sweep.
    #[tracing::instrument(skip(self))]
    pub async fn run_sweep(&self) -> Result<SweepStats> {
        let now = Utc::now();
        let mut stats = SweepStats::default();

        // Payment timeouts: PendingPayment older than the timeout.
        let timeout = chrono_duration(self.config.payment_timeout);
        for order in self.ledger.orders_in_state(OrderState::PendingPayment).await? {
            if now - order.created_at < timeout {
                continue;
            }
            match self.engine.cancel(order.id, "payment timeout").await {
                Ok(_) => stats.cancelled += 1,
                Err(e) => {
                    tracing::warn!(order_id = %order.id, error = %e, "sweep cancel failed");
                }
            }
        }

        // No-objection promotion: seller reported, buyer never objected.
        let window = chrono_duration(self.config.no_objection_window);
        for order in self
            .ledger
            .orders_in_state(OrderState::AwaitingHandoff)
            .await?
        {
            let Some(reported_at) = order.seller_reported_at else {
                continue;
            };
            if now - reported_at < window {
                continue;
            }
            match self.engine.promote_reported_delivery(order.id).await {
                Ok(_) => stats.promoted += 1,
                Err(e) => {
                    tracing::warn!(order_id = %order.id, error = %e, "sweep promotion failed");
                }
            }
        }

        // Graced settlement: Delivered and untouched past the grace period.
        let grace = chrono_duration(self.config.settlement_grace);
        for order in self.ledger.orders_in_state(OrderState::Delivered).await? {
            if order.settlement_failed || now - order.updated_at < grace {
                continue;
            }
            match self.settle(order.id).await {
                Ok(_) => stats.settled += 1,
                Err(e) => {
                    tracing::warn!(order_id = %order.id, error = %e, "sweep settlement failed");
                }
            }
        }

        Ok(stats)
    }

    /// Runs the sweep forever at the given period. Intended for
    /// `tokio::spawn`.
    pub async fn run_every(&self, period: Duration) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            match self.run_sweep().await {
                Ok(stats) => {
                    if stats != SweepStats::default() {
                        tracing::info!(
                            cancelled = stats.cancelled,
                            promoted = stats.promoted,
                            settled = stats.settled,
                            "sweep applied transitions"
                        );
                    }
                }
                Err(e) => tracing::error!(error = %e, "sweep failed"),
            }
        }
    }

    /// Calls the payout API with exponential backoff up to the bounded
    /// attempt count. Exhaustion flags the order and raises an operator
    /// alert; the order state is never force-advanced.
    async fn payout_with_backoff(&self, order: &OrderRecord) -> Result<PayoutReceipt> {
        let mut delay = self.config.payout_backoff_base;
        let mut last_error = None;

        for attempt in 1..=self.config.payout_attempts {
            match self
                .gateway
                .payout(order.id, order.seller_id, order.price)
                .await
            {
                Ok(receipt) => return Ok(receipt),
                Err(e @ GatewayError::InsufficientFunds) => {
                    // Retrying cannot fund the account.
                    last_error = Some(e);
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        order_id = %order.id,
                        attempt,
                        error = %e,
                        "payout attempt failed"
                    );
                    last_error = Some(e);
                    if attempt < self.config.payout_attempts {
                        metrics::counter!("payout_retries_total").increment(1);
                        tokio::time::sleep(delay).await;
                        delay = delay.saturating_mul(2);
                    }
                }
            }
        }

        let source = last_error.unwrap_or_else(|| {
            GatewayError::Unavailable("no payout attempts configured".to_string())
        });

        if let Err(e) = self.engine.mark_settlement_failed(order.id).await {
            tracing::warn!(order_id = %order.id, error = %e, "failed to flag settlement failure");
        }

        metrics::counter!("settlement_failures_total").increment(1);
        tracing::error!(
            order_id = %order.id,
            attempts = self.config.payout_attempts,
            error = %source,
            "payout attempts exhausted, settlement withheld for operator"
        );

        Err(SettlementError::PayoutExhausted {
            order_id: order.id,
            attempts: self.config.payout_attempts,
            source,
        })
    }
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::max_value())
}

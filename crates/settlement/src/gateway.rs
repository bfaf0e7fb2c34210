//! Payout gateway trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::{Money, OrderId, UserId};
use thiserror::Error;

/// Errors reported by the payout gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The gateway could not be reached. Transient; retried with backoff.
    #[error("Payment gateway unavailable: {0}")]
    Unavailable(String),

    /// The escrow account cannot cover the payout.
    #[error("Insufficient escrow funds for payout")]
    InsufficientFunds,
}

/// Receipt for a completed payout.
#[derive(Debug, Clone)]
pub struct PayoutReceipt {
    /// The payout ID assigned by the gateway.
    pub payout_id: String,
}

/// Trait for the gateway's payout API.
#[async_trait]
pub trait PayoutGateway: Send + Sync {
    /// Releases escrowed funds to the seller's account.
    ///
    /// Payouts are keyed by order id at the gateway, so a repeated call for
    /// the same order pays out at most once and returns the original
    /// receipt.
    async fn payout(
        &self,
        order_id: OrderId,
        seller_account: UserId,
        amount: Money,
    ) -> Result<PayoutReceipt, GatewayError>;
}

#[derive(Debug, Default)]
struct InMemoryPayoutState {
    payouts: HashMap<OrderId, String>,
    next_id: u32,
    unavailable_remaining: u32,
    fail_insufficient: bool,
}

/// In-memory payout gateway for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPayoutGateway {
    state: Arc<RwLock<InMemoryPayoutState>>,
}

impl InMemoryPayoutGateway {
    /// Creates a new in-memory payout gateway.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` payout calls fail as unavailable.
    pub fn set_unavailable_for(&self, count: u32) {
        self.state.write().unwrap().unavailable_remaining = count;
    }

    /// Configures the gateway to report insufficient funds.
    pub fn set_fail_insufficient(&self, fail: bool) {
        self.state.write().unwrap().fail_insufficient = fail;
    }

    /// Returns the number of completed payouts.
    pub fn payout_count(&self) -> usize {
        self.state.read().unwrap().payouts.len()
    }

    /// Returns true if a payout was made for the given order.
    pub fn has_payout(&self, order_id: OrderId) -> bool {
        self.state.read().unwrap().payouts.contains_key(&order_id)
    }
}

#[async_trait]
impl PayoutGateway for InMemoryPayoutGateway {
    async fn payout(
        &self,
        order_id: OrderId,
        _seller_account: UserId,
        _amount: Money,
    ) -> Result<PayoutReceipt, GatewayError> {
        let mut state = self.state.write().unwrap();

        if state.unavailable_remaining > 0 {
            state.unavailable_remaining -= 1;
            return Err(GatewayError::Unavailable("connection refused".to_string()));
        }

        if state.fail_insufficient {
            return Err(GatewayError::InsufficientFunds);
        }

        if let Some(existing) = state.payouts.get(&order_id) {
            return Ok(PayoutReceipt {
                payout_id: existing.clone(),
            });
        }

        state.next_id += 1;
        let payout_id = format!("PAYOUT-{:04}", state.next_id);
        state.payouts.insert(order_id, payout_id.clone());

        Ok(PayoutReceipt { payout_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn payout_is_idempotent_per_order() {
        let gateway = InMemoryPayoutGateway::new();
        let order_id = OrderId::new();
        let seller = UserId::new();
        let amount = Money::from_cents(5000);

        let first = gateway.payout(order_id, seller, amount).await.unwrap();
        let second = gateway.payout(order_id, seller, amount).await.unwrap();

        assert_eq!(first.payout_id, second.payout_id);
        assert_eq!(gateway.payout_count(), 1);
    }

    #[tokio::test]
    async fn unavailable_for_n_calls() {
        let gateway = InMemoryPayoutGateway::new();
        gateway.set_unavailable_for(2);

        let order_id = OrderId::new();
        let seller = UserId::new();
        let amount = Money::from_cents(5000);

        assert!(matches!(
            gateway.payout(order_id, seller, amount).await,
            Err(GatewayError::Unavailable(_))
        ));
        assert!(matches!(
            gateway.payout(order_id, seller, amount).await,
            Err(GatewayError::Unavailable(_))
        ));
        assert!(gateway.payout(order_id, seller, amount).await.is_ok());
        assert_eq!(gateway.payout_count(), 1);
    }

    #[tokio::test]
    async fn insufficient_funds_is_not_retried_away() {
        let gateway = InMemoryPayoutGateway::new();
        gateway.set_fail_insufficient(true);

        let result = gateway
            .payout(OrderId::new(), UserId::new(), Money::from_cents(100))
            .await;
        assert!(matches!(result, Err(GatewayError::InsufficientFunds)));
        assert_eq!(gateway.payout_count(), 0);
    }
}

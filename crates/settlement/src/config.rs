//! Timer and retry configuration for reconciliation and settlement.

use std::time::Duration;

/// Windows, ceilings, and backoff settings with production defaults.
///
/// Reads from environment variables when constructed via `from_env`:
/// - `PAYMENT_TIMEOUT_SECS` — pending-payment timeout (default: 1800)
/// - `PAYMENT_FAILURE_CEILING` — failed attempts before auto-cancel (default: 3)
/// - `NO_OBJECTION_WINDOW_SECS` — seller-reported delivery window (default: 86400)
/// - `SETTLEMENT_GRACE_SECS` — delivered-order grace before sweep settles (default: 86400)
/// - `DISPUTE_WINDOW_SECS` — post-settlement refund window (default: 604800)
/// - `PAYOUT_ATTEMPTS` — bounded payout attempts (default: 4)
/// - `PAYOUT_BACKOFF_BASE_MS` — initial backoff delay (default: 100)
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// How long an order may sit in PendingPayment before the sweep
    /// cancels it.
    pub payment_timeout: Duration,

    /// Failed payment attempts after which the order is auto-cancelled.
    pub payment_failure_ceiling: u32,

    /// How long after a seller-reported delivery the buyer may object
    /// before the sweep promotes the order to Delivered.
    pub no_objection_window: Duration,

    /// How long an order may sit in Delivered before the sweep settles it.
    pub settlement_grace: Duration,

    /// How long after settlement a gateway refund is still accepted.
    pub dispute_window: Duration,

    /// Bounded number of payout attempts per settlement.
    pub payout_attempts: u32,

    /// Initial payout retry delay; doubles per attempt.
    pub payout_backoff_base: Duration,
}

impl SettlementConfig {
    /// Loads configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            payment_timeout: env_secs("PAYMENT_TIMEOUT_SECS", defaults.payment_timeout),
            payment_failure_ceiling: env_u32(
                "PAYMENT_FAILURE_CEILING",
                defaults.payment_failure_ceiling,
            ),
            no_objection_window: env_secs("NO_OBJECTION_WINDOW_SECS", defaults.no_objection_window),
            settlement_grace: env_secs("SETTLEMENT_GRACE_SECS", defaults.settlement_grace),
            dispute_window: env_secs("DISPUTE_WINDOW_SECS", defaults.dispute_window),
            payout_attempts: env_u32("PAYOUT_ATTEMPTS", defaults.payout_attempts),
            payout_backoff_base: env_millis(
                "PAYOUT_BACKOFF_BASE_MS",
                defaults.payout_backoff_base,
            ),
        }
    }
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            payment_timeout: Duration::from_secs(30 * 60),
            payment_failure_ceiling: 3,
            no_objection_window: Duration::from_secs(24 * 60 * 60),
            settlement_grace: Duration::from_secs(24 * 60 * 60),
            dispute_window: Duration::from_secs(7 * 24 * 60 * 60),
            payout_attempts: 4,
            payout_backoff_base: Duration::from_millis(100),
        }
    }
}

fn env_secs(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_millis(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

//! Read-only engine state for the display collaborator.
//!
//! The publisher owns a watch channel of serializable snapshots. Consumers
//! hold receivers and can only read; nothing outside the engine task
//! mutates the snapshot.

use crate::engine::{AttemptOutcome, Direction, Quote, TradeAttempt};
use crate::risk::GuardSnapshot;
use crate::shutdown::ShutdownPhase;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::watch;

/// Compact record of the last completed attempt.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptSummary {
    pub attempt_id: u64,
    pub direction: Direction,
    pub effective_spread: Decimal,
    pub outcome: AttemptOutcome,
    pub finished_at: DateTime<Utc>,
}

impl From<&TradeAttempt> for AttemptSummary {
    fn from(attempt: &TradeAttempt) -> Self {
        Self {
            attempt_id: attempt.attempt_id,
            direction: attempt.direction,
            effective_spread: attempt.effective_spread,
            outcome: attempt.outcome,
            finished_at: attempt.finished_at,
        }
    }
}

/// Point-in-time view of the whole engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub market: String,
    pub quote_a: Option<Quote>,
    pub quote_b: Option<Quote>,
    /// Best effective spread from the latest evaluation, when one was
    /// computable.
    pub effective_spread: Option<Decimal>,
    pub guard: GuardSnapshot,
    pub last_attempt: Option<AttemptSummary>,
    pub shutdown: ShutdownPhase,
    pub updated_at: DateTime<Utc>,
}

/// Owns and updates the published snapshot.
pub struct StatusPublisher {
    tx: watch::Sender<EngineSnapshot>,
}

impl StatusPublisher {
    pub fn new(market: &str, guard: GuardSnapshot) -> Self {
        let (tx, _) = watch::channel(EngineSnapshot {
            market: market.to_string(),
            quote_a: None,
            quote_b: None,
            effective_spread: None,
            guard,
            last_attempt: None,
            shutdown: ShutdownPhase::Normal,
            updated_at: Utc::now(),
        });
        Self { tx }
    }

    /// Read-only handle for the display collaborator.
    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        self.tx.borrow().clone()
    }

    pub fn update_market(
        &self,
        quote_a: Option<Quote>,
        quote_b: Option<Quote>,
        effective_spread: Option<Decimal>,
    ) {
        self.tx.send_modify(|snapshot| {
            snapshot.quote_a = quote_a;
            snapshot.quote_b = quote_b;
            snapshot.effective_spread = effective_spread;
            snapshot.updated_at = Utc::now();
        });
    }

    pub fn update_guard(&self, guard: GuardSnapshot) {
        self.tx.send_modify(|snapshot| {
            snapshot.guard = guard;
            snapshot.updated_at = Utc::now();
        });
    }

    pub fn record_attempt(&self, attempt: &TradeAttempt) {
        let summary = AttemptSummary::from(attempt);
        self.tx.send_modify(|snapshot| {
            snapshot.last_attempt = Some(summary);
            snapshot.updated_at = Utc::now();
        });
    }

    pub fn set_shutdown(&self, phase: ShutdownPhase) {
        self.tx.send_modify(|snapshot| {
            snapshot.shutdown = phase;
            snapshot.updated_at = Utc::now();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SessionId;
    use rust_decimal_macros::dec;

    fn guard_snapshot() -> GuardSnapshot {
        GuardSnapshot {
            window_start: Utc::now(),
            trade_count: 0,
            max_trades: 1000,
            window_resets_at: Utc::now(),
            exposure_halt: false,
        }
    }

    fn quote(session: SessionId) -> Quote {
        Quote {
            session,
            bid: dec!(100.00),
            ask: dec!(100.05),
            bid_size: dec!(0.5),
            ask_size: dec!(0.5),
            exchange_ts: Utc::now(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn test_readers_observe_updates() {
        let publisher = StatusPublisher::new("BTC-USD-PERP", guard_snapshot());
        let reader = publisher.subscribe();

        publisher.update_market(Some(quote(SessionId::A)), None, Some(dec!(0.03)));

        let snapshot = reader.borrow().clone();
        assert_eq!(snapshot.market, "BTC-USD-PERP");
        assert!(snapshot.quote_a.is_some());
        assert!(snapshot.quote_b.is_none());
        assert_eq!(snapshot.effective_spread, Some(dec!(0.03)));
    }

    #[test]
    fn test_snapshot_serializes() {
        let publisher = StatusPublisher::new("BTC-USD-PERP", guard_snapshot());
        publisher.update_market(Some(quote(SessionId::A)), Some(quote(SessionId::B)), None);
        publisher.set_shutdown(ShutdownPhase::Requested);

        let json = serde_json::to_value(publisher.snapshot()).unwrap();
        assert_eq!(json["market"], "BTC-USD-PERP");
        assert_eq!(json["shutdown"], "Requested");
        assert!(json["quote_a"]["bid"].is_string());
    }
}

//! Core domain types shared across the engine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one of the two account sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionId {
    A,
    B,
}

impl SessionId {
    pub fn other(self) -> Self {
        match self {
            SessionId::A => SessionId::B,
            SessionId::B => SessionId::A,
        }
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionId::A => write!(f, "A"),
            SessionId::B => write!(f, "B"),
        }
    }
}

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
}

/// Latest top-of-book for one session.
///
/// Immutable once created; a newer quote for the same session replaces the
/// prior one through the feed's single-slot watch channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub session: SessionId,
    pub bid: Decimal,
    pub ask: Decimal,
    pub bid_size: Decimal,
    pub ask_size: Decimal,
    /// Timestamp stamped by the venue.
    pub exchange_ts: DateTime<Utc>,
    /// Timestamp stamped locally on receipt.
    pub received_at: DateTime<Utc>,
}

impl Quote {
    /// Milliseconds since this quote was received.
    pub fn age_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.received_at).num_milliseconds()
    }

    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / dec!(2)
    }
}

/// Which session buys and which sells in a triggered trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Session A is the cheap side (buys), session B the rich side (sells).
    BuyASellB,
    /// Session B is the cheap side (buys), session A the rich side (sells).
    BuyBSellA,
}

impl Direction {
    pub fn buyer(self) -> SessionId {
        match self {
            Direction::BuyASellB => SessionId::A,
            Direction::BuyBSellA => SessionId::B,
        }
    }

    pub fn seller(self) -> SessionId {
        self.buyer().other()
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buy {} / sell {}", self.buyer(), self.seller())
    }
}

/// A single spread observation that cleared eligibility checks.
#[derive(Debug, Clone, Serialize)]
pub struct SpreadSample {
    pub market: String,
    pub direction: Direction,
    /// Best ask on the cheap session.
    pub cheap_ask: Decimal,
    /// Best bid on the rich session.
    pub rich_bid: Decimal,
    /// rich_bid - cheap_ask, before the fee buffer.
    pub gross_spread: Decimal,
    /// Gross spread net of the round-trip fee/slippage buffer.
    pub effective_spread: Decimal,
    pub computed_at: DateTime<Utc>,
}

/// Lifecycle of a single order leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegState {
    Pending,
    Submitted,
    Filled,
    Rejected,
    TimedOut,
    Cancelled,
}

impl LegState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, LegState::Pending | LegState::Submitted)
    }
}

impl fmt::Display for LegState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LegState::Pending => "PENDING",
            LegState::Submitted => "SUBMITTED",
            LegState::Filled => "FILLED",
            LegState::Rejected => "REJECTED",
            LegState::TimedOut => "TIMED_OUT",
            LegState::Cancelled => "CANCELLED",
        };
        write!(f, "{}", s)
    }
}

/// One side of a two-sided spread trade, executed on one session.
#[derive(Debug, Clone, Serialize)]
pub struct OrderLeg {
    pub leg_id: u64,
    pub session: SessionId,
    pub side: OrderSide,
    pub size: Decimal,
    pub order_type: OrderType,
    pub state: LegState,
    /// Venue order id, once acknowledged.
    pub order_id: Option<String>,
    pub fill_price: Option<Decimal>,
}

impl OrderLeg {
    pub fn new(leg_id: u64, session: SessionId, side: OrderSide, size: Decimal) -> Self {
        Self {
            leg_id,
            session,
            side,
            size,
            order_type: OrderType::Market,
            state: LegState::Pending,
            order_id: None,
            fill_price: None,
        }
    }

    pub fn is_filled(&self) -> bool {
        self.state == LegState::Filled
    }
}

/// Terminal classification of a two-leg attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    /// Both legs filled; the spread was captured.
    BothFilled,
    /// One leg failed; the filled leg was flattened successfully.
    OneLegFailedCompensated,
    /// One leg failed and compensation also failed: real directional
    /// exposure remains and requires manual reconciliation.
    OneLegFailedUncompensated,
    /// Neither leg filled; no exposure.
    Aborted,
}

impl AttemptOutcome {
    /// Whether the attempt put at least one fill on the tape.
    pub fn has_fill(self) -> bool {
        !matches!(self, AttemptOutcome::Aborted)
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AttemptOutcome::BothFilled => "BOTH_FILLED",
            AttemptOutcome::OneLegFailedCompensated => "ONE_LEG_FAILED_COMPENSATED",
            AttemptOutcome::OneLegFailedUncompensated => "ONE_LEG_FAILED_UNCOMPENSATED",
            AttemptOutcome::Aborted => "ABORTED",
        };
        write!(f, "{}", s)
    }
}

/// A completed two-leg trade attempt, handed off as history once terminal.
#[derive(Debug, Clone, Serialize)]
pub struct TradeAttempt {
    pub attempt_id: u64,
    pub market: String,
    pub direction: Direction,
    pub effective_spread: Decimal,
    pub buy_leg: OrderLeg,
    pub sell_leg: OrderLeg,
    /// The flattening order issued when exactly one leg filled.
    pub compensation: Option<OrderLeg>,
    pub outcome: AttemptOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_direction_sides() {
        assert_eq!(Direction::BuyASellB.buyer(), SessionId::A);
        assert_eq!(Direction::BuyASellB.seller(), SessionId::B);
        assert_eq!(Direction::BuyBSellA.buyer(), SessionId::B);
        assert_eq!(Direction::BuyBSellA.to_string(), "buy B / sell A");
    }

    #[test]
    fn test_leg_state_terminality() {
        assert!(!LegState::Pending.is_terminal());
        assert!(!LegState::Submitted.is_terminal());
        assert!(LegState::Filled.is_terminal());
        assert!(LegState::Rejected.is_terminal());
        assert!(LegState::TimedOut.is_terminal());
        assert!(LegState::Cancelled.is_terminal());
    }

    #[test]
    fn test_outcome_fill_classification() {
        assert!(AttemptOutcome::BothFilled.has_fill());
        assert!(AttemptOutcome::OneLegFailedCompensated.has_fill());
        assert!(AttemptOutcome::OneLegFailedUncompensated.has_fill());
        assert!(!AttemptOutcome::Aborted.has_fill());
    }

    #[test]
    fn test_quote_mid() {
        let quote = Quote {
            session: SessionId::A,
            bid: dec!(100.00),
            ask: dec!(100.10),
            bid_size: dec!(0.5),
            ask_size: dec!(0.5),
            exchange_ts: Utc::now(),
            received_at: Utc::now(),
        };
        assert_eq!(quote.mid(), dec!(100.05));
    }
}

//! Spread evaluation and two-leg execution.
//!
//! The evaluator decides *whether* to trade from the two freshest quotes;
//! the coordinator owns *how* a triggered trade runs: both legs submitted
//! concurrently, watched to a terminal state, and a one-sided fill
//! compensated on the session that filled.

mod evaluator;
mod executor;
mod types;

pub use evaluator::{Evaluation, SpreadEvaluator, SuppressReason};
pub use executor::{AttemptPhase, ExecutionCoordinator, ExecutionTiming};
pub use types::{
    AttemptOutcome, Direction, LegState, OrderLeg, OrderSide, OrderType, Quote, SessionId,
    SpreadSample, TradeAttempt,
};

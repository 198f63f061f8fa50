//! Two-leg execution coordination.
//!
//! One attempt at a time: the coordinator owns a single phase slot and a
//! trigger that arrives while any attempt is live is dropped, not queued.
//! Both legs are dispatched in the same poll; waiting on their outcomes is
//! the only suspension point in the trading path. A one-sided fill is
//! neutralized by a compensating order on the session that filled.

use crate::config::{CompensationMode, ExecutionConfig};
use crate::engine::types::{
    AttemptOutcome, Direction, LegState, OrderLeg, OrderSide, SessionId, SpreadSample,
    TradeAttempt,
};
use crate::session::{OrderAck, OrderError, OrderRequest, SessionApi};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Execution state machine phase, observed by the shutdown coordinator and
/// the status publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AttemptPhase {
    Idle,
    LegsSubmitting(u64),
    LegsPending(u64),
}

impl AttemptPhase {
    pub fn is_idle(self) -> bool {
        self == AttemptPhase::Idle
    }

    pub fn attempt_id(self) -> Option<u64> {
        match self {
            AttemptPhase::Idle => None,
            AttemptPhase::LegsSubmitting(id) | AttemptPhase::LegsPending(id) => Some(id),
        }
    }
}

/// Timing bounds for the execution path.
#[derive(Debug, Clone)]
pub struct ExecutionTiming {
    pub leg_timeout: Duration,
    pub compensation_timeout: Duration,
    pub status_poll: Duration,
    pub compensation: CompensationMode,
}

impl ExecutionTiming {
    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self {
            leg_timeout: Duration::from_secs(config.leg_timeout_secs),
            compensation_timeout: Duration::from_secs(config.compensation_timeout_secs),
            status_poll: Duration::from_millis(config.status_poll_ms),
            compensation: config.compensation,
        }
    }
}

/// Drives one trade attempt at a time across the two sessions.
pub struct ExecutionCoordinator {
    session_a: Arc<dyn SessionApi>,
    session_b: Arc<dyn SessionApi>,
    market: String,
    timing: ExecutionTiming,
    phase: watch::Sender<AttemptPhase>,
    outcomes: mpsc::Sender<TradeAttempt>,
    next_attempt_id: AtomicU64,
    next_leg_id: AtomicU64,
}

impl ExecutionCoordinator {
    pub fn new(
        session_a: Arc<dyn SessionApi>,
        session_b: Arc<dyn SessionApi>,
        market: &str,
        timing: ExecutionTiming,
        outcomes: mpsc::Sender<TradeAttempt>,
    ) -> Arc<Self> {
        let (phase, _) = watch::channel(AttemptPhase::Idle);
        Arc::new(Self {
            session_a,
            session_b,
            market: market.to_string(),
            timing,
            phase,
            outcomes,
            next_attempt_id: AtomicU64::new(1),
            next_leg_id: AtomicU64::new(1),
        })
    }

    /// Observe attempt phase transitions.
    pub fn phase_receiver(&self) -> watch::Receiver<AttemptPhase> {
        self.phase.subscribe()
    }

    pub fn is_idle(&self) -> bool {
        self.phase.borrow().is_idle()
    }

    /// Start an attempt for the given sample, unless one is already live.
    ///
    /// Returns the attempt id, or `None` when the trigger was dropped
    /// because an attempt is in flight. Only the engine task calls this;
    /// the busy-to-idle transition is owned by the attempt task itself.
    pub fn try_trigger(self: &Arc<Self>, sample: SpreadSample, size: Decimal) -> Option<u64> {
        if !self.is_idle() {
            debug!("Trigger dropped - attempt already in flight");
            return None;
        }

        let attempt_id = self.next_attempt_id.fetch_add(1, Ordering::SeqCst);
        self.phase
            .send_replace(AttemptPhase::LegsSubmitting(attempt_id));

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_attempt(attempt_id, sample, size).await;
        });

        Some(attempt_id)
    }

    async fn run_attempt(self: Arc<Self>, attempt_id: u64, sample: SpreadSample, size: Decimal) {
        let started_at = Utc::now();

        let (buy_api, sell_api) = match sample.direction {
            Direction::BuyASellB => (self.session_a.clone(), self.session_b.clone()),
            Direction::BuyBSellA => (self.session_b.clone(), self.session_a.clone()),
        };

        let buy_leg = self.new_leg(sample.direction.buyer(), OrderSide::Buy, size);
        let sell_leg = self.new_leg(sample.direction.seller(), OrderSide::Sell, size);

        info!(
            attempt_id,
            direction = %sample.direction,
            effective_spread = %sample.effective_spread,
            %size,
            "Submitting both legs"
        );

        let buy_request = OrderRequest::market_order(&self.market, buy_leg.side, size);
        let sell_request = OrderRequest::market_order(&self.market, sell_leg.side, size);

        // Both submissions dispatched in the same poll - no serialization
        // delay between the two sides.
        let (buy_submit, sell_submit) = tokio::join!(
            buy_api.submit_order(&buy_request),
            sell_api.submit_order(&sell_request),
        );

        self.phase.send_replace(AttemptPhase::LegsPending(attempt_id));

        let (buy_leg, sell_leg) = tokio::join!(
            self.settle_leg(buy_api.clone(), buy_leg, buy_submit, self.timing.leg_timeout),
            self.settle_leg(
                sell_api.clone(),
                sell_leg,
                sell_submit,
                self.timing.leg_timeout
            ),
        );

        let mut compensation = None;
        let outcome = match (buy_leg.is_filled(), sell_leg.is_filled()) {
            (true, true) => AttemptOutcome::BothFilled,
            (false, false) => AttemptOutcome::Aborted,
            (buy_filled, _) => {
                let (filled_leg, failed_leg, filled_api) = if buy_filled {
                    (&buy_leg, &sell_leg, buy_api)
                } else {
                    (&sell_leg, &buy_leg, sell_api)
                };

                warn!(
                    attempt_id,
                    filled_session = %filled_leg.session,
                    failed_session = %failed_leg.session,
                    failed_state = %failed_leg.state,
                    "One leg failed - compensating the filled leg"
                );

                let leg = self.compensate(filled_api, filled_leg).await;
                let compensated = leg.is_filled();
                compensation = Some(leg);

                if compensated {
                    AttemptOutcome::OneLegFailedCompensated
                } else {
                    AttemptOutcome::OneLegFailedUncompensated
                }
            }
        };

        let attempt = TradeAttempt {
            attempt_id,
            market: self.market.clone(),
            direction: sample.direction,
            effective_spread: sample.effective_spread,
            buy_leg,
            sell_leg,
            compensation,
            outcome,
            started_at,
            finished_at: Utc::now(),
        };

        match outcome {
            AttemptOutcome::BothFilled => {
                info!(attempt_id, "Both legs filled - spread captured");
            }
            AttemptOutcome::OneLegFailedCompensated => {
                warn!(attempt_id, "One leg failed, exposure flattened");
            }
            AttemptOutcome::OneLegFailedUncompensated => {
                error!(
                    attempt_id,
                    "CRITICAL: compensation failed - naked directional exposure, \
                     manual reconciliation required"
                );
            }
            AttemptOutcome::Aborted => {
                info!(attempt_id, "Both legs failed - no exposure");
            }
        }

        // Hand the outcome off before releasing the slot so the guard
        // records this attempt before the next trigger can be admitted.
        if self.outcomes.send(attempt).await.is_err() {
            warn!(attempt_id, "Outcome receiver dropped");
        }
        self.phase.send_replace(AttemptPhase::Idle);
    }

    fn new_leg(&self, session: SessionId, side: OrderSide, size: Decimal) -> OrderLeg {
        OrderLeg::new(
            self.next_leg_id.fetch_add(1, Ordering::SeqCst),
            session,
            side,
            size,
        )
    }

    /// Carry one leg from its submission result to a terminal state.
    async fn settle_leg(
        &self,
        api: Arc<dyn SessionApi>,
        mut leg: OrderLeg,
        submit: Result<OrderAck, OrderError>,
        budget: Duration,
    ) -> OrderLeg {
        match submit {
            Ok(ack) => {
                leg.order_id = Some(ack.id.clone());
                leg.state = LegState::Submitted;
                let (state, fill_price) = self.watch_order(api.as_ref(), &ack.id, budget).await;
                leg.state = state;
                leg.fill_price = fill_price;
            }
            Err(OrderError::Timeout) => {
                warn!(session = %api.label(), "Order submission timed out");
                leg.state = LegState::TimedOut;
            }
            Err(e) => {
                warn!(session = %api.label(), error = %e, "Order submission failed");
                leg.state = LegState::Rejected;
            }
        }
        leg
    }

    /// Poll an order to a terminal state within the budget.
    ///
    /// On timeout the order gets a best-effort cancel; if the cancel is
    /// refused because the order already closed, a final status read
    /// decides whether it actually filled under us.
    async fn watch_order(
        &self,
        api: &dyn SessionApi,
        order_id: &str,
        budget: Duration,
    ) -> (LegState, Option<Decimal>) {
        match tokio::time::timeout(budget, self.poll_until_terminal(api, order_id)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(session = %api.label(), order_id, "Leg timed out - cancelling");
                match api.cancel_order(order_id).await {
                    Ok(()) => (LegState::TimedOut, None),
                    Err(_) => match api.order_status(order_id).await {
                        Ok(report) if report.leg_state() == Some(LegState::Filled) => {
                            (LegState::Filled, report.avg_fill_price)
                        }
                        _ => (LegState::TimedOut, None),
                    },
                }
            }
        }
    }

    async fn poll_until_terminal(
        &self,
        api: &dyn SessionApi,
        order_id: &str,
    ) -> (LegState, Option<Decimal>) {
        loop {
            match api.order_status(order_id).await {
                Ok(report) => {
                    if let Some(state) = report.leg_state() {
                        return (state, report.avg_fill_price);
                    }
                }
                Err(e) => {
                    // Transient; the overall wait is bounded by the caller.
                    debug!(session = %api.label(), order_id, error = %e, "Status poll failed");
                }
            }
            tokio::time::sleep(self.timing.status_poll).await;
        }
    }

    /// Neutralize the exposure left by a one-sided fill, as fast as
    /// possible, accepting slippage.
    async fn compensate(&self, api: Arc<dyn SessionApi>, filled: &OrderLeg) -> OrderLeg {
        if self.timing.compensation == CompensationMode::CancelThenFlatten {
            if let Some(order_id) = &filled.order_id {
                // Market fills are normally already closed; this only
                // matters when the fill is still resting on the venue.
                if let Err(e) = api.cancel_order(order_id).await {
                    debug!(session = %api.label(), error = %e, "Pre-flatten cancel refused");
                }
            }
        }

        let leg = self.new_leg(filled.session, filled.side.opposite(), filled.size);

        warn!(
            session = %api.label(),
            side = %leg.side,
            size = %leg.size,
            "Submitting compensating order"
        );

        let request = OrderRequest::market_order(&self.market, leg.side, leg.size);
        let submit = api.submit_order(&request).await;
        self.settle_leg(api, leg, submit, self.timing.compensation_timeout)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{OrderSide, SessionId};
    use crate::session::mock::{MockSession, ScriptedOutcome};
    use rust_decimal_macros::dec;

    fn fast_timing(mode: CompensationMode) -> ExecutionTiming {
        ExecutionTiming {
            leg_timeout: Duration::from_millis(100),
            compensation_timeout: Duration::from_millis(100),
            status_poll: Duration::from_millis(5),
            compensation: mode,
        }
    }

    fn sample(direction: Direction) -> SpreadSample {
        SpreadSample {
            market: "BTC-USD-PERP".to_string(),
            direction,
            cheap_ask: dec!(100.00),
            rich_bid: dec!(100.15),
            gross_spread: dec!(0.15),
            effective_spread: dec!(0.15),
            computed_at: Utc::now(),
        }
    }

    struct Harness {
        coordinator: Arc<ExecutionCoordinator>,
        session_a: Arc<MockSession>,
        session_b: Arc<MockSession>,
        outcomes: mpsc::Receiver<TradeAttempt>,
    }

    fn harness(mode: CompensationMode) -> Harness {
        let session_a = Arc::new(MockSession::new("mock-a"));
        let session_b = Arc::new(MockSession::new("mock-b"));
        let (tx, rx) = mpsc::channel(16);
        let coordinator = ExecutionCoordinator::new(
            session_a.clone(),
            session_b.clone(),
            "BTC-USD-PERP",
            fast_timing(mode),
            tx,
        );
        Harness {
            coordinator,
            session_a,
            session_b,
            outcomes: rx,
        }
    }

    #[tokio::test]
    async fn test_both_filled() {
        let mut h = harness(CompensationMode::Flatten);
        h.session_a.script(ScriptedOutcome::FillAt(dec!(100.00)));
        h.session_b.script(ScriptedOutcome::FillAt(dec!(100.15)));

        let attempt_id = h
            .coordinator
            .try_trigger(sample(Direction::BuyASellB), dec!(0.01))
            .unwrap();
        let attempt = h.outcomes.recv().await.unwrap();

        assert_eq!(attempt.attempt_id, attempt_id);
        assert_eq!(attempt.outcome, AttemptOutcome::BothFilled);
        assert_eq!(attempt.buy_leg.session, SessionId::A);
        assert_eq!(attempt.buy_leg.state, LegState::Filled);
        assert_eq!(attempt.sell_leg.session, SessionId::B);
        assert_eq!(attempt.sell_leg.fill_price, Some(dec!(100.15)));
        assert!(attempt.compensation.is_none());
        assert!(h.coordinator.is_idle());
    }

    #[tokio::test]
    async fn test_one_leg_rejected_compensated() {
        let mut h = harness(CompensationMode::Flatten);
        // Buy on A fills, sell on B is rejected, compensation sell on A fills.
        h.session_a.script(ScriptedOutcome::FillAt(dec!(100.00)));
        h.session_a.script(ScriptedOutcome::FillAt(dec!(99.98)));
        h.session_b.script(ScriptedOutcome::RejectWith("margin check failed"));

        h.coordinator
            .try_trigger(sample(Direction::BuyASellB), dec!(0.01))
            .unwrap();
        let attempt = h.outcomes.recv().await.unwrap();

        assert_eq!(attempt.outcome, AttemptOutcome::OneLegFailedCompensated);
        assert_eq!(attempt.sell_leg.state, LegState::Rejected);

        let compensation = attempt.compensation.unwrap();
        assert_eq!(compensation.session, SessionId::A);
        assert_eq!(compensation.side, OrderSide::Sell);
        assert_eq!(compensation.state, LegState::Filled);

        // Entry buy + compensating sell both landed on A; B refused its one.
        assert_eq!(h.session_a.submitted_count(), 2);
        assert_eq!(h.session_b.submitted_count(), 0);
    }

    #[tokio::test]
    async fn test_compensation_failure_is_uncompensated() {
        let mut h = harness(CompensationMode::Flatten);
        h.session_a.script(ScriptedOutcome::FillAt(dec!(100.00)));
        h.session_a.script(ScriptedOutcome::RejectWith("venue busy"));
        h.session_b.script(ScriptedOutcome::RejectWith("margin check failed"));

        h.coordinator
            .try_trigger(sample(Direction::BuyASellB), dec!(0.01))
            .unwrap();
        let attempt = h.outcomes.recv().await.unwrap();

        assert_eq!(attempt.outcome, AttemptOutcome::OneLegFailedUncompensated);
        assert_eq!(attempt.compensation.unwrap().state, LegState::Rejected);
    }

    #[tokio::test]
    async fn test_both_rejected_aborts_without_compensation() {
        let mut h = harness(CompensationMode::Flatten);
        h.session_a.script(ScriptedOutcome::RejectWith("margin check failed"));
        h.session_b.script(ScriptedOutcome::RejectWith("margin check failed"));

        h.coordinator
            .try_trigger(sample(Direction::BuyASellB), dec!(0.01))
            .unwrap();
        let attempt = h.outcomes.recv().await.unwrap();

        assert_eq!(attempt.outcome, AttemptOutcome::Aborted);
        assert!(attempt.compensation.is_none());
        assert!(h.coordinator.is_idle());
    }

    #[tokio::test]
    async fn test_stuck_leg_times_out_and_sibling_is_compensated() {
        let mut h = harness(CompensationMode::Flatten);
        // Sell on B never fills; buy on A fills and must be flattened.
        h.session_a.script(ScriptedOutcome::FillAt(dec!(100.00)));
        h.session_a.script(ScriptedOutcome::FillAt(dec!(99.97)));
        h.session_b.script(ScriptedOutcome::StayOpen);

        h.coordinator
            .try_trigger(sample(Direction::BuyASellB), dec!(0.01))
            .unwrap();
        let attempt = h.outcomes.recv().await.unwrap();

        assert_eq!(attempt.sell_leg.state, LegState::TimedOut);
        assert_eq!(attempt.outcome, AttemptOutcome::OneLegFailedCompensated);
        // The stuck order was cancelled on the venue.
        let stuck_id = attempt.sell_leg.order_id.unwrap();
        let report = h.session_b.order_status(&stuck_id).await.unwrap();
        assert_eq!(report.leg_state(), Some(LegState::Cancelled));
    }

    #[tokio::test]
    async fn test_direction_routes_legs_to_sessions() {
        let mut h = harness(CompensationMode::Flatten);
        h.session_a.script(ScriptedOutcome::FillAt(dec!(100.15)));
        h.session_b.script(ScriptedOutcome::FillAt(dec!(100.00)));

        h.coordinator
            .try_trigger(sample(Direction::BuyBSellA), dec!(0.01))
            .unwrap();
        let attempt = h.outcomes.recv().await.unwrap();

        assert_eq!(attempt.outcome, AttemptOutcome::BothFilled);
        assert_eq!(attempt.buy_leg.session, SessionId::B);
        assert_eq!(attempt.sell_leg.session, SessionId::A);

        let a_requests = h.session_a.submitted_requests();
        assert_eq!(a_requests.len(), 1);
        assert_eq!(a_requests[0].side, OrderSide::Sell);
    }

    #[tokio::test]
    async fn test_concurrent_trigger_is_dropped() {
        let mut h = harness(CompensationMode::Flatten);
        h.session_a.script(ScriptedOutcome::FillAt(dec!(100.00)));
        h.session_b.script(ScriptedOutcome::FillAt(dec!(100.15)));

        let first = h
            .coordinator
            .try_trigger(sample(Direction::BuyASellB), dec!(0.01));
        assert_eq!(first, Some(1));

        // The slot is claimed synchronously; a second trigger is dropped.
        assert!(h
            .coordinator
            .try_trigger(sample(Direction::BuyASellB), dec!(0.01))
            .is_none());

        let attempt = h.outcomes.recv().await.unwrap();
        assert_eq!(attempt.attempt_id, 1);

        // Once idle again, the next attempt id is sequential.
        h.session_a.script(ScriptedOutcome::FillAt(dec!(100.00)));
        h.session_b.script(ScriptedOutcome::FillAt(dec!(100.15)));
        let second = h
            .coordinator
            .try_trigger(sample(Direction::BuyASellB), dec!(0.01));
        assert_eq!(second, Some(2));
        let attempt = h.outcomes.recv().await.unwrap();
        assert_eq!(attempt.attempt_id, 2);
    }

    #[tokio::test]
    async fn test_cancel_then_flatten_cancels_before_flattening() {
        let mut h = harness(CompensationMode::CancelThenFlatten);
        h.session_a.script(ScriptedOutcome::FillAt(dec!(100.00)));
        h.session_a.script(ScriptedOutcome::FillAt(dec!(99.99)));
        h.session_b.script(ScriptedOutcome::RejectWith("margin check failed"));

        h.coordinator
            .try_trigger(sample(Direction::BuyASellB), dec!(0.01))
            .unwrap();
        let attempt = h.outcomes.recv().await.unwrap();

        // The cancel against the already-closed fill is refused and
        // ignored; the flatten still lands.
        assert_eq!(attempt.outcome, AttemptOutcome::OneLegFailedCompensated);
        assert_eq!(h.session_a.submitted_count(), 2);
    }
}

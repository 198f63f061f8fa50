//! Cross-session spread evaluation.
//!
//! Level-triggered: the engine re-evaluates on every feed update, but only
//! with a mutually fresh pair of quotes. Any missing, stale, skewed, or
//! thin quote freezes evaluation - there is no fallback value.

use crate::config::SpreadConfig;
use crate::engine::types::{Direction, Quote, SessionId, SpreadSample};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Why an evaluation pass did not trigger.
#[derive(Debug, Clone, PartialEq)]
pub enum SuppressReason {
    MissingQuote(SessionId),
    StaleQuote(SessionId),
    SkewTooWide { skew_ms: i64 },
    ThinBook,
    BelowThreshold { best_effective: Decimal },
}

/// Result of one evaluation pass.
#[derive(Debug, Clone)]
pub enum Evaluation {
    Trigger(SpreadSample),
    Suppressed(SuppressReason),
}

/// Computes the cross-session spread and decides whether to trigger.
pub struct SpreadEvaluator {
    market: String,
    config: SpreadConfig,
}

impl SpreadEvaluator {
    pub fn new(market: &str, config: SpreadConfig) -> Self {
        Self {
            market: market.to_string(),
            config,
        }
    }

    /// Evaluate the two latest quotes.
    ///
    /// Both directions are computed; if both clear the threshold the one
    /// computed last wins (the most recent observation of the flip).
    pub fn evaluate(
        &self,
        quote_a: Option<&Quote>,
        quote_b: Option<&Quote>,
        now: DateTime<Utc>,
    ) -> Evaluation {
        let quote_a = match quote_a {
            Some(q) => q,
            None => return Evaluation::Suppressed(SuppressReason::MissingQuote(SessionId::A)),
        };
        let quote_b = match quote_b {
            Some(q) => q,
            None => return Evaluation::Suppressed(SuppressReason::MissingQuote(SessionId::B)),
        };

        for quote in [quote_a, quote_b] {
            if quote.age_ms(now) > self.config.max_quote_age_ms {
                return Evaluation::Suppressed(SuppressReason::StaleQuote(quote.session));
            }
        }

        let skew_ms = (quote_a.received_at - quote_b.received_at)
            .num_milliseconds()
            .abs();
        if skew_ms > self.config.max_skew_ms {
            return Evaluation::Suppressed(SuppressReason::SkewTooWide { skew_ms });
        }

        if quote_a.bid_size < self.config.min_depth
            || quote_a.ask_size < self.config.min_depth
            || quote_b.bid_size < self.config.min_depth
            || quote_b.ask_size < self.config.min_depth
        {
            return Evaluation::Suppressed(SuppressReason::ThinBook);
        }

        // Fee buffer is a round-trip rate applied on the mid price.
        let mid = (quote_a.mid() + quote_b.mid()) / Decimal::TWO;
        let buffer = mid * self.config.fee_buffer_rate;

        let mut best: Option<SpreadSample> = None;
        for (direction, cheap, rich) in [
            (Direction::BuyASellB, quote_a, quote_b),
            (Direction::BuyBSellA, quote_b, quote_a),
        ] {
            let gross = rich.bid - cheap.ask;
            let effective = gross - buffer;
            let better = match &best {
                Some(sample) => effective >= sample.effective_spread,
                None => true,
            };
            if better {
                best = Some(SpreadSample {
                    market: self.market.clone(),
                    direction,
                    cheap_ask: cheap.ask,
                    rich_bid: rich.bid,
                    gross_spread: gross,
                    effective_spread: effective,
                    computed_at: now,
                });
            }
        }

        let sample = best.expect("two directions were computed");
        if sample.effective_spread >= self.config.trigger_threshold {
            Evaluation::Trigger(sample)
        } else {
            Evaluation::Suppressed(SuppressReason::BelowThreshold {
                best_effective: sample.effective_spread,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn test_config() -> SpreadConfig {
        SpreadConfig {
            trigger_threshold: dec!(0.10),
            fee_buffer_rate: Decimal::ZERO,
            max_quote_age_ms: 2_000,
            max_skew_ms: 500,
            min_depth: dec!(0.03),
        }
    }

    fn quote(
        session: SessionId,
        bid: Decimal,
        ask: Decimal,
        received_at: DateTime<Utc>,
    ) -> Quote {
        Quote {
            session,
            bid,
            ask,
            bid_size: dec!(0.5),
            ask_size: dec!(0.5),
            exchange_ts: received_at,
            received_at,
        }
    }

    #[test]
    fn test_triggers_on_wide_spread() {
        // A asks 100.00, B bids 100.15 -> buy A / sell B, spread 0.15
        let evaluator = SpreadEvaluator::new("BTC-USD-PERP", test_config());
        let now = Utc::now();
        let a = quote(SessionId::A, dec!(99.95), dec!(100.00), now);
        let b = quote(SessionId::B, dec!(100.15), dec!(100.20), now);

        match evaluator.evaluate(Some(&a), Some(&b), now) {
            Evaluation::Trigger(sample) => {
                assert_eq!(sample.direction, Direction::BuyASellB);
                assert_eq!(sample.effective_spread, dec!(0.15));
                assert_eq!(sample.cheap_ask, dec!(100.00));
                assert_eq!(sample.rich_bid, dec!(100.15));
            }
            other => panic!("expected trigger, got {:?}", other),
        }
    }

    #[test]
    fn test_never_triggers_on_skew_regardless_of_spread() {
        let evaluator = SpreadEvaluator::new("BTC-USD-PERP", test_config());
        let now = Utc::now();
        let a = quote(SessionId::A, dec!(99.95), dec!(100.00), now);
        // Enormous spread, but the quote pair is 600ms apart.
        let b = quote(
            SessionId::B,
            dec!(150.00),
            dec!(150.05),
            now - Duration::milliseconds(600),
        );

        match evaluator.evaluate(Some(&a), Some(&b), now) {
            Evaluation::Suppressed(SuppressReason::SkewTooWide { skew_ms }) => {
                assert_eq!(skew_ms, 600);
            }
            other => panic!("expected skew suppression, got {:?}", other),
        }
    }

    #[test]
    fn test_stale_quote_freezes_evaluation() {
        let mut config = test_config();
        config.max_skew_ms = 10_000;
        let evaluator = SpreadEvaluator::new("BTC-USD-PERP", config);
        let now = Utc::now();
        let a = quote(
            SessionId::A,
            dec!(99.95),
            dec!(100.00),
            now - Duration::milliseconds(5_000),
        );
        let b = quote(SessionId::B, dec!(150.00), dec!(150.05), now);

        assert!(matches!(
            evaluator.evaluate(Some(&a), Some(&b), now),
            Evaluation::Suppressed(SuppressReason::StaleQuote(SessionId::A))
        ));
    }

    #[test]
    fn test_missing_quote_freezes_evaluation() {
        let evaluator = SpreadEvaluator::new("BTC-USD-PERP", test_config());
        let now = Utc::now();
        let b = quote(SessionId::B, dec!(100.15), dec!(100.20), now);

        assert!(matches!(
            evaluator.evaluate(None, Some(&b), now),
            Evaluation::Suppressed(SuppressReason::MissingQuote(SessionId::A))
        ));
    }

    #[test]
    fn test_thin_book_suppresses() {
        let evaluator = SpreadEvaluator::new("BTC-USD-PERP", test_config());
        let now = Utc::now();
        let a = quote(SessionId::A, dec!(99.95), dec!(100.00), now);
        let mut b = quote(SessionId::B, dec!(100.15), dec!(100.20), now);
        b.bid_size = dec!(0.010);

        assert!(matches!(
            evaluator.evaluate(Some(&a), Some(&b), now),
            Evaluation::Suppressed(SuppressReason::ThinBook)
        ));
    }

    #[test]
    fn test_fee_buffer_narrows_spread() {
        let mut config = test_config();
        // Buffer = mid (~100) * 0.001 = ~0.10, eating the whole 0.15 spread.
        config.fee_buffer_rate = dec!(0.001);
        let evaluator = SpreadEvaluator::new("BTC-USD-PERP", config);
        let now = Utc::now();
        let a = quote(SessionId::A, dec!(99.95), dec!(100.00), now);
        let b = quote(SessionId::B, dec!(100.15), dec!(100.20), now);

        assert!(matches!(
            evaluator.evaluate(Some(&a), Some(&b), now),
            Evaluation::Suppressed(SuppressReason::BelowThreshold { .. })
        ));
    }

    #[test]
    fn test_opposite_direction_detected() {
        let evaluator = SpreadEvaluator::new("BTC-USD-PERP", test_config());
        let now = Utc::now();
        // B is the cheap side here.
        let a = quote(SessionId::A, dec!(100.15), dec!(100.20), now);
        let b = quote(SessionId::B, dec!(99.95), dec!(100.00), now);

        match evaluator.evaluate(Some(&a), Some(&b), now) {
            Evaluation::Trigger(sample) => {
                assert_eq!(sample.direction, Direction::BuyBSellA);
            }
            other => panic!("expected trigger, got {:?}", other),
        }
    }

    #[test]
    fn test_below_threshold_reports_best_effective() {
        let evaluator = SpreadEvaluator::new("BTC-USD-PERP", test_config());
        let now = Utc::now();
        let a = quote(SessionId::A, dec!(100.00), dec!(100.02), now);
        let b = quote(SessionId::B, dec!(100.05), dec!(100.07), now);

        match evaluator.evaluate(Some(&a), Some(&b), now) {
            Evaluation::Suppressed(SuppressReason::BelowThreshold { best_effective }) => {
                assert_eq!(best_effective, dec!(0.03));
            }
            other => panic!("expected below-threshold, got {:?}", other),
        }
    }
}

//! Trading limits.
//!
//! The trade guard bounds how many completed attempts the engine may run
//! inside a rolling wall-clock window, and latches a halt whenever an
//! attempt leaves uncompensated exposure. The guard is owned and mutated
//! only by the engine task; everything else reads snapshots.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::engine::AttemptOutcome;

/// Rolling-window counter state, persisted across restarts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardWindow {
    pub window_start: DateTime<Utc>,
    pub trade_count: u32,
}

/// Why the guard refused a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    /// The window quota is spent; admits again once the window rolls over.
    WindowExhausted { resets_at: DateTime<Utc> },
    /// Uncompensated exposure is latched; requires `clear-halt`.
    ExposureHalt,
}

/// Read-only view for the status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct GuardSnapshot {
    pub window_start: DateTime<Utc>,
    pub trade_count: u32,
    pub max_trades: u32,
    pub window_resets_at: DateTime<Utc>,
    pub exposure_halt: bool,
}

/// Admission control for trade attempts.
pub struct TradeGuard {
    max_trades: u32,
    window_duration: Duration,
    window: GuardWindow,
    exposure_halt: bool,
}

impl TradeGuard {
    /// Build the guard, restoring persisted state when present so a
    /// restart cannot be used to bypass the limit.
    pub fn new(
        max_trades: u32,
        window_hours: u32,
        restored: Option<GuardWindow>,
        exposure_halt: bool,
    ) -> Self {
        let window = restored.unwrap_or_else(|| GuardWindow {
            window_start: Utc::now(),
            trade_count: 0,
        });

        if exposure_halt {
            warn!("Exposure halt is latched from a previous run - trading disabled until cleared");
        }

        Self {
            max_trades,
            window_duration: Duration::hours(window_hours as i64),
            window,
            exposure_halt,
        }
    }

    fn resets_at(&self) -> DateTime<Utc> {
        self.window.window_start + self.window_duration
    }

    /// Roll the window forward if its duration has elapsed. The reset is
    /// strictly wall-clock driven, independent of trade outcomes.
    fn roll_window(&mut self, now: DateTime<Utc>) {
        if now - self.window.window_start >= self.window_duration {
            info!(
                old_count = self.window.trade_count,
                "Guard window elapsed - counter reset"
            );
            self.window = GuardWindow {
                window_start: now,
                trade_count: 0,
            };
        }
    }

    /// Consulted before every attempt.
    pub fn admit(&mut self, now: DateTime<Utc>) -> Admission {
        if self.exposure_halt {
            return Admission::ExposureHalt;
        }

        self.roll_window(now);

        if self.window.trade_count >= self.max_trades {
            Admission::WindowExhausted {
                resets_at: self.resets_at(),
            }
        } else {
            Admission::Admit
        }
    }

    /// Record a completed attempt. Attempts that put a fill on the tape
    /// count toward the window; a full abort does not.
    ///
    /// Returns whether the attempt was counted.
    pub fn record_completed(&mut self, outcome: AttemptOutcome, now: DateTime<Utc>) -> bool {
        self.roll_window(now);

        if !outcome.has_fill() {
            return false;
        }

        self.window.trade_count += 1;
        info!(
            trade_count = self.window.trade_count,
            max_trades = self.max_trades,
            "Guard counter incremented"
        );
        true
    }

    /// Latch the halt after uncompensated exposure. Only a human clears it.
    pub fn latch_exposure_halt(&mut self) {
        self.exposure_halt = true;
    }

    pub fn exposure_halted(&self) -> bool {
        self.exposure_halt
    }

    pub fn window(&self) -> &GuardWindow {
        &self.window
    }

    pub fn snapshot(&self) -> GuardSnapshot {
        GuardSnapshot {
            window_start: self.window.window_start,
            trade_count: self.window.trade_count,
            max_trades: self.max_trades,
            window_resets_at: self.resets_at(),
            exposure_halt: self.exposure_halt,
        }
    }
}

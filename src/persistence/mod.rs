//! SQLite persistence for guard counters and the trade ledger.
//!
//! Persists across restarts:
//! - Guard window counters (so a restart cannot bypass the trade limit)
//! - The exposure halt flag
//! - An append-only ledger of completed trade attempts

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::engine::{OrderLeg, TradeAttempt};
use crate::risk::GuardWindow;

/// One ledger row, as read back for display.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub attempt_id: u64,
    pub market: String,
    pub direction: String,
    pub effective_spread: Decimal,
    pub buy_state: String,
    pub sell_state: String,
    pub compensation_state: Option<String>,
    pub outcome: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// SQLite-based persistence manager.
pub struct LedgerStore {
    conn: Connection,
}

impl LedgerStore {
    /// Open the database, initializing the schema if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create data directory {:?}", parent))?;
            }
        }

        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        let store = Self { conn };
        store.init_schema()?;

        info!("Ledger store initialized at {:?}", db_path.as_ref());
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            -- Guard window (singleton row)
            CREATE TABLE IF NOT EXISTS guard_window (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                window_start TEXT NOT NULL,
                trade_count INTEGER NOT NULL
            );

            -- Engine flags (singleton row)
            CREATE TABLE IF NOT EXISTS engine_flags (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                exposure_halt INTEGER NOT NULL DEFAULT 0
            );

            -- Append-only trade attempt ledger
            CREATE TABLE IF NOT EXISTS attempts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                attempt_id INTEGER NOT NULL,
                market TEXT NOT NULL,
                direction TEXT NOT NULL,
                effective_spread TEXT NOT NULL,
                buy_session TEXT NOT NULL,
                buy_state TEXT NOT NULL,
                buy_fill_price TEXT,
                sell_session TEXT NOT NULL,
                sell_state TEXT NOT NULL,
                sell_fill_price TEXT,
                compensation_state TEXT,
                outcome TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_attempts_finished ON attempts(finished_at);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    /// Persist the guard window.
    pub fn save_guard(&self, window: &GuardWindow) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO guard_window (id, window_start, trade_count)
            VALUES (1, ?1, ?2)
            ON CONFLICT(id) DO UPDATE SET
                window_start = ?1,
                trade_count = ?2
            "#,
            params![
                window.window_start.to_rfc3339(),
                window.trade_count,
            ],
        )?;
        Ok(())
    }

    /// Load the guard window, if one was persisted.
    pub fn load_guard(&self) -> Result<Option<GuardWindow>> {
        let row: Option<(String, u32)> = self
            .conn
            .query_row(
                "SELECT window_start, trade_count FROM guard_window WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((window_start, trade_count)) = row else {
            return Ok(None);
        };

        Ok(Some(GuardWindow {
            window_start: DateTime::parse_from_rfc3339(&window_start)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            trade_count,
        }))
    }

    /// Read the exposure halt flag.
    pub fn exposure_halt(&self) -> Result<bool> {
        let flag: Option<i64> = self
            .conn
            .query_row(
                "SELECT exposure_halt FROM engine_flags WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(flag.unwrap_or(0) != 0)
    }

    /// Set or clear the exposure halt flag.
    pub fn set_exposure_halt(&self, halted: bool) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO engine_flags (id, exposure_halt)
            VALUES (1, ?1)
            ON CONFLICT(id) DO UPDATE SET exposure_halt = ?1
            "#,
            params![halted as i64],
        )?;
        Ok(())
    }

    fn leg_fill_price(leg: &OrderLeg) -> Option<String> {
        leg.fill_price.map(|p| p.to_string())
    }

    /// Append a completed attempt to the ledger.
    pub fn append_attempt(&self, attempt: &TradeAttempt) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO attempts (attempt_id, market, direction, effective_spread,
                                  buy_session, buy_state, buy_fill_price,
                                  sell_session, sell_state, sell_fill_price,
                                  compensation_state, outcome, started_at, finished_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
            params![
                attempt.attempt_id,
                attempt.market,
                attempt.direction.to_string(),
                attempt.effective_spread.to_string(),
                attempt.buy_leg.session.to_string(),
                attempt.buy_leg.state.to_string(),
                Self::leg_fill_price(&attempt.buy_leg),
                attempt.sell_leg.session.to_string(),
                attempt.sell_leg.state.to_string(),
                Self::leg_fill_price(&attempt.sell_leg),
                attempt.compensation.as_ref().map(|leg| leg.state.to_string()),
                attempt.outcome.to_string(),
                attempt.started_at.to_rfc3339(),
                attempt.finished_at.to_rfc3339(),
            ],
        )?;

        debug!(attempt_id = attempt.attempt_id, "Attempt appended to ledger");
        Ok(())
    }

    /// Most recent ledger entries, newest first.
    pub fn recent_attempts(&self, limit: usize) -> Result<Vec<LedgerEntry>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT attempt_id, market, direction, effective_spread,
                   buy_state, sell_state, compensation_state, outcome,
                   started_at, finished_at
            FROM attempts
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;

        let entries: Vec<LedgerEntry> = stmt
            .query_map([limit], |row| {
                Ok(LedgerEntry {
                    attempt_id: row.get(0)?,
                    market: row.get(1)?,
                    direction: row.get(2)?,
                    effective_spread: Decimal::from_str(&row.get::<_, String>(3)?)
                        .unwrap_or_default(),
                    buy_state: row.get(4)?,
                    sell_state: row.get(5)?,
                    compensation_state: row.get(6)?,
                    outcome: row.get(7)?,
                    started_at: DateTime::parse_from_rfc3339(&row.get::<_, String>(8)?)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    finished_at: DateTime::parse_from_rfc3339(&row.get::<_, String>(9)?)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(entries)
    }

    /// Total attempts recorded, by outcome.
    pub fn outcome_counts(&self) -> Result<Vec<(String, u64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT outcome, COUNT(*) FROM attempts GROUP BY outcome ORDER BY COUNT(*) DESC",
        )?;

        let counts: Vec<(String, u64)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{
        AttemptOutcome, Direction, LegState, OrderLeg, OrderSide, SessionId,
    };
    use rust_decimal_macros::dec;

    fn test_attempt(attempt_id: u64, outcome: AttemptOutcome) -> TradeAttempt {
        let mut buy_leg = OrderLeg::new(1, SessionId::A, OrderSide::Buy, dec!(0.01));
        buy_leg.state = LegState::Filled;
        buy_leg.fill_price = Some(dec!(100.00));

        let mut sell_leg = OrderLeg::new(2, SessionId::B, OrderSide::Sell, dec!(0.01));
        sell_leg.state = LegState::Filled;
        sell_leg.fill_price = Some(dec!(100.15));

        TradeAttempt {
            attempt_id,
            market: "BTC-USD-PERP".to_string(),
            direction: Direction::BuyASellB,
            effective_spread: dec!(0.15),
            buy_leg,
            sell_leg,
            compensation: None,
            outcome,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn test_save_and_load_guard() {
        let store = LedgerStore::in_memory().unwrap();
        assert!(store.load_guard().unwrap().is_none());

        let window = GuardWindow {
            window_start: Utc::now(),
            trade_count: 7,
        };
        store.save_guard(&window).unwrap();

        let loaded = store.load_guard().unwrap().unwrap();
        assert_eq!(loaded.trade_count, 7);
        assert_eq!(
            loaded.window_start.timestamp(),
            window.window_start.timestamp()
        );
    }

    #[test]
    fn test_exposure_halt_flag_roundtrip() {
        let store = LedgerStore::in_memory().unwrap();
        assert!(!store.exposure_halt().unwrap());

        store.set_exposure_halt(true).unwrap();
        assert!(store.exposure_halt().unwrap());

        store.set_exposure_halt(false).unwrap();
        assert!(!store.exposure_halt().unwrap());
    }

    #[test]
    fn test_ledger_is_append_only_and_ordered() {
        let store = LedgerStore::in_memory().unwrap();

        store
            .append_attempt(&test_attempt(1, AttemptOutcome::BothFilled))
            .unwrap();
        store
            .append_attempt(&test_attempt(2, AttemptOutcome::Aborted))
            .unwrap();
        store
            .append_attempt(&test_attempt(3, AttemptOutcome::OneLegFailedCompensated))
            .unwrap();

        let recent = store.recent_attempts(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].attempt_id, 3);
        assert_eq!(recent[1].attempt_id, 2);
        assert_eq!(recent[1].outcome, "ABORTED");
        assert_eq!(recent[0].effective_spread, dec!(0.15));
    }

    #[test]
    fn test_outcome_counts() {
        let store = LedgerStore::in_memory().unwrap();

        store
            .append_attempt(&test_attempt(1, AttemptOutcome::BothFilled))
            .unwrap();
        store
            .append_attempt(&test_attempt(2, AttemptOutcome::BothFilled))
            .unwrap();
        store
            .append_attempt(&test_attempt(3, AttemptOutcome::Aborted))
            .unwrap();

        let counts = store.outcome_counts().unwrap();
        assert_eq!(counts[0], ("BOTH_FILLED".to_string(), 2));
    }
}

//! Configuration management for the dual taker.
//!
//! Loads settings from environment variables and config files.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Instrument under trade
    #[serde(default)]
    pub instrument: InstrumentConfig,
    /// Venue endpoints and per-session credentials
    #[serde(default)]
    pub sessions: SessionsConfig,
    /// Spread trigger parameters
    #[serde(default)]
    pub spread: SpreadConfig,
    /// Leg execution parameters
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Trade guard limits
    #[serde(default)]
    pub guard: GuardConfig,
    /// Shutdown drain parameters
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentConfig {
    /// Market symbol in venue format
    #[serde(default = "default_market")]
    pub market: String,
    /// Size of each leg, in base units
    #[serde(default = "default_leg_size")]
    pub leg_size: Decimal,
    /// Quantity step the venue accepts
    #[serde(default = "default_size_step")]
    pub size_step: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// REST base URL
    #[serde(default = "default_rest_url")]
    pub rest_url: String,
    /// WebSocket base URL
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// First account session
    #[serde(default = "default_session_a")]
    pub a: SessionAuthConfig,
    /// Second account session
    #[serde(default = "default_session_b")]
    pub b: SessionAuthConfig,
    /// Initial reconnect backoff in milliseconds
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,
    /// Backoff ceiling in milliseconds
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
    /// Consecutive reconnect failures before the session is declared
    /// unavailable for the rest of the process lifetime
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionAuthConfig {
    /// Display label for logs and the status snapshot
    pub label: String,
    /// Path to the credential file produced by the login collaborator
    pub auth_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpreadConfig {
    /// Minimum effective spread (absolute price) that fires a trade
    #[serde(default = "default_trigger_threshold")]
    pub trigger_threshold: Decimal,
    /// Round-trip fee/slippage buffer as a rate on the mid price
    #[serde(default = "default_fee_buffer_rate")]
    pub fee_buffer_rate: Decimal,
    /// Maximum age of a quote before it is ineligible
    #[serde(default = "default_max_quote_age_ms")]
    pub max_quote_age_ms: i64,
    /// Maximum receive-timestamp skew between the two quotes
    #[serde(default = "default_max_skew_ms")]
    pub max_skew_ms: i64,
    /// Minimum top-of-book depth on both sides, in base units
    #[serde(default = "default_min_depth")]
    pub min_depth: Decimal,
}

/// How a one-sided fill is neutralized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompensationMode {
    /// Immediately flatten with an opposite-side market order.
    Flatten,
    /// Cancel the filled order if still resting, then flatten the remainder.
    CancelThenFlatten,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Per-leg wait for a terminal state, in seconds
    #[serde(default = "default_leg_timeout_secs")]
    pub leg_timeout_secs: u64,
    /// Bound on the compensation order, in seconds
    #[serde(default = "default_compensation_timeout_secs")]
    pub compensation_timeout_secs: u64,
    /// Interval between order status polls, in milliseconds
    #[serde(default = "default_status_poll_ms")]
    pub status_poll_ms: u64,
    /// Compensation strategy for one-sided fills
    #[serde(default = "default_compensation_mode")]
    pub compensation: CompensationMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Maximum completed trades per rolling window
    #[serde(default = "default_max_trades")]
    pub max_trades: u32,
    /// Rolling window length in hours
    #[serde(default = "default_window_hours")]
    pub window_hours: u32,
    /// SQLite database holding guard counters and the trade ledger
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Grace period for an in-flight attempt to settle, in seconds
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
}

// Default value functions

fn default_market() -> String {
    "BTC-USD-PERP".to_string()
}

fn default_leg_size() -> Decimal {
    Decimal::new(1, 2) // 0.01 BTC
}

fn default_size_step() -> Decimal {
    Decimal::new(1, 3) // 0.001
}

fn default_rest_url() -> String {
    "https://api.prod.paradex.trade/v1".to_string()
}

fn default_ws_url() -> String {
    "wss://ws.api.prod.paradex.trade/v1".to_string()
}

fn default_session_a() -> SessionAuthConfig {
    SessionAuthConfig {
        label: "Account A".to_string(),
        auth_file: "data/auth_a.json".to_string(),
    }
}

fn default_session_b() -> SessionAuthConfig {
    SessionAuthConfig {
        label: "Account B".to_string(),
        auth_file: "data/auth_b.json".to_string(),
    }
}

fn default_reconnect_initial_ms() -> u64 {
    500
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_trigger_threshold() -> Decimal {
    Decimal::new(10, 2) // 0.10 quote units
}

fn default_fee_buffer_rate() -> Decimal {
    // ~0.02% per side taker estimate, round trip
    Decimal::new(4, 4) // 0.0004
}

fn default_max_quote_age_ms() -> i64 {
    2_000
}

fn default_max_skew_ms() -> i64 {
    500
}

fn default_min_depth() -> Decimal {
    Decimal::new(30, 3) // 0.030 BTC top-of-book on both sides
}

fn default_leg_timeout_secs() -> u64 {
    10
}

fn default_compensation_timeout_secs() -> u64 {
    10
}

fn default_status_poll_ms() -> u64 {
    250
}

fn default_compensation_mode() -> CompensationMode {
    CompensationMode::Flatten
}

fn default_max_trades() -> u32 {
    1000
}

fn default_window_hours() -> u32 {
    24
}

fn default_db_path() -> String {
    "data/dual_taker.db".to_string()
}

fn default_grace_period_secs() -> u64 {
    30
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("DTK"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.instrument.market.is_empty(),
            "instrument.market must not be empty"
        );

        anyhow::ensure!(
            self.instrument.leg_size > Decimal::ZERO,
            "instrument.leg_size must be positive"
        );

        anyhow::ensure!(
            self.spread.trigger_threshold > Decimal::ZERO,
            "spread.trigger_threshold must be positive"
        );

        anyhow::ensure!(
            self.spread.fee_buffer_rate >= Decimal::ZERO && self.spread.fee_buffer_rate < Decimal::ONE,
            "spread.fee_buffer_rate must be in [0, 1)"
        );

        anyhow::ensure!(
            self.spread.max_quote_age_ms > 0 && self.spread.max_skew_ms > 0,
            "spread freshness bounds must be positive"
        );

        anyhow::ensure!(
            self.execution.leg_timeout_secs > 0 && self.execution.compensation_timeout_secs > 0,
            "execution timeouts must be positive"
        );

        anyhow::ensure!(self.guard.max_trades >= 1, "guard.max_trades must be >= 1");

        anyhow::ensure!(
            self.guard.window_hours >= 1,
            "guard.window_hours must be >= 1"
        );

        anyhow::ensure!(
            self.sessions.a.auth_file != self.sessions.b.auth_file,
            "sessions must use distinct credential files"
        );

        anyhow::ensure!(
            self.sessions.max_reconnect_attempts >= 1,
            "sessions.max_reconnect_attempts must be >= 1"
        );

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            instrument: InstrumentConfig::default(),
            sessions: SessionsConfig::default(),
            spread: SpreadConfig::default(),
            execution: ExecutionConfig::default(),
            guard: GuardConfig::default(),
            shutdown: ShutdownConfig::default(),
        }
    }
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            market: default_market(),
            leg_size: default_leg_size(),
            size_step: default_size_step(),
        }
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            rest_url: default_rest_url(),
            ws_url: default_ws_url(),
            a: default_session_a(),
            b: default_session_b(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

impl Default for SpreadConfig {
    fn default() -> Self {
        Self {
            trigger_threshold: default_trigger_threshold(),
            fee_buffer_rate: default_fee_buffer_rate(),
            max_quote_age_ms: default_max_quote_age_ms(),
            max_skew_ms: default_max_skew_ms(),
            min_depth: default_min_depth(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            leg_timeout_secs: default_leg_timeout_secs(),
            compensation_timeout_secs: default_compensation_timeout_secs(),
            status_poll_ms: default_status_poll_ms(),
            compensation: default_compensation_mode(),
        }
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_trades: default_max_trades(),
            window_hours: default_window_hours(),
            db_path: default_db_path(),
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: default_grace_period_secs(),
        }
    }
}

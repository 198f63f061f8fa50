//! # Dual Taker
//!
//! A dual-session spread engine for a single perpetual instrument on Paradex.
//! Two independently authenticated account sessions each hold a live quote
//! feed; when the cross-session spread clears a configured threshold the
//! engine fires a matched pair of opposite-side market orders and tracks
//! both legs to a terminal state, compensating a one-sided fill.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `session`: Per-account credentials, REST order client, and quote feed
//! - `engine`: Spread evaluation and two-leg execution coordination
//! - `risk`: Rolling-window trade guard and exposure halt latch
//! - `shutdown`: Signal handling and bounded drain
//! - `status`: Read-only engine snapshots for external display
//! - `persistence`: SQLite-based guard counters and trade ledger
//! - `utils`: Shared decimal arithmetic helpers

pub mod config;
pub mod engine;
pub mod persistence;
pub mod risk;
pub mod session;
pub mod shutdown;
pub mod status;
pub mod utils;

pub use config::Config;

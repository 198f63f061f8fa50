//! Per-session WebSocket quote feed.
//!
//! Each session runs one feed task that maintains a connection to the
//! venue's best-bid/offer channel and publishes the latest quote through a
//! single-slot watch channel: the evaluator always reads the freshest
//! value, never a backlog. On disconnect the published quote is cleared
//! until the reconnected stream serves a fresh book.

use crate::engine::{Quote, SessionId};
use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Connection parameters for one feed.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub ws_url: String,
    pub market: String,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
    /// Consecutive failed connections before the session is declared
    /// unavailable and the feed task ends.
    pub max_reconnect_attempts: u32,
}

/// Handle to a running feed task.
pub struct FeedHandle {
    /// Latest quote; `None` until the first update and whenever the
    /// connection is down or the book is resynchronizing.
    pub quotes: watch::Receiver<Option<Quote>>,
    pub task: JoinHandle<()>,
}

/// A quote feed for one account session.
pub struct QuoteFeed {
    session: SessionId,
    label: String,
    config: FeedConfig,
}

#[derive(Debug, Deserialize)]
struct WsMessage {
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<WsParams>,
}

#[derive(Debug, Deserialize)]
struct WsParams {
    channel: String,
    data: BboData,
}

#[derive(Debug, Deserialize)]
struct BboData {
    market: String,
    #[serde(with = "rust_decimal::serde::str")]
    bid: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    ask: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    bid_size: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    ask_size: Decimal,
    /// Venue timestamp in milliseconds.
    last_updated_at: i64,
}

impl QuoteFeed {
    pub fn new(session: SessionId, label: &str, config: FeedConfig) -> Self {
        Self {
            session,
            label: label.to_string(),
            config,
        }
    }

    /// Spawn the feed task and return its quote receiver.
    pub fn spawn(self) -> FeedHandle {
        let (tx, rx) = watch::channel(None);
        let task = tokio::spawn(self.run(tx));
        FeedHandle { quotes: rx, task }
    }

    async fn run(self, tx: watch::Sender<Option<Quote>>) {
        let mut failures: u32 = 0;
        let mut delay = self.config.reconnect_initial;

        loop {
            let mut served_quotes = false;
            let result = self.stream_quotes(&tx, &mut served_quotes).await;

            // The book must resynchronize before fresh quotes are served
            // again; a missing quote freezes evaluation, never a fallback.
            tx.send_replace(None);

            match result {
                Ok(()) => info!(session = %self.label, "Quote stream closed by venue"),
                Err(e) => warn!(session = %self.label, error = %e, "Quote stream failed"),
            }

            if served_quotes {
                failures = 0;
                delay = self.config.reconnect_initial;
            } else {
                failures += 1;
                if failures >= self.config.max_reconnect_attempts {
                    error!(
                        session = %self.label,
                        attempts = failures,
                        "Reconnection attempts exhausted - session unavailable"
                    );
                    return;
                }
            }

            let wait = delay + Duration::from_millis(jitter_ms(delay));
            info!(
                session = %self.label,
                attempt = failures + 1,
                wait_ms = wait.as_millis() as u64,
                "Reconnecting quote stream"
            );
            tokio::time::sleep(wait).await;

            delay = (delay * 2).min(self.config.reconnect_max);
        }
    }

    /// Connect, subscribe, and publish quotes until the stream ends.
    async fn stream_quotes(
        &self,
        tx: &watch::Sender<Option<Quote>>,
        served_quotes: &mut bool,
    ) -> Result<()> {
        let (ws_stream, _) = connect_async(self.config.ws_url.as_str())
            .await
            .context("Failed to connect to WebSocket")?;

        let (mut write, mut read) = ws_stream.split();

        let subscribe = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "subscribe",
            "params": { "channel": format!("bbo.{}", self.config.market) },
            "id": 1,
        });
        write
            .send(Message::Text(subscribe.to_string().into()))
            .await
            .context("Failed to subscribe to BBO channel")?;

        info!(session = %self.label, market = %self.config.market, "Quote stream connected");

        while let Some(message) = read.next().await {
            match message.context("WebSocket read error")? {
                Message::Text(text) => {
                    if let Some(quote) =
                        parse_bbo(&text, self.session, &self.config.market, Utc::now())
                    {
                        *served_quotes = true;
                        tx.send_replace(Some(quote));
                    }
                }
                Message::Ping(_) => {
                    debug!(session = %self.label, "Received ping");
                    // Pong is handled automatically by tungstenite
                }
                Message::Close(_) => return Ok(()),
                _ => {}
            }
        }

        Ok(())
    }
}

/// Parse one BBO subscription message into a quote.
///
/// Non-BBO frames (subscription acks, other channels) return `None`.
fn parse_bbo(text: &str, session: SessionId, market: &str, now: DateTime<Utc>) -> Option<Quote> {
    let message: WsMessage = serde_json::from_str(text).ok()?;

    if message.method.as_deref() != Some("subscription") {
        return None;
    }

    let params = message.params?;
    if params.channel != format!("bbo.{}", market) || params.data.market != market {
        return None;
    }

    let exchange_ts = Utc
        .timestamp_millis_opt(params.data.last_updated_at)
        .single()
        .unwrap_or(now);

    Some(Quote {
        session,
        bid: params.data.bid,
        ask: params.data.ask,
        bid_size: params.data.bid_size,
        ask_size: params.data.ask_size,
        exchange_ts,
        received_at: now,
    })
}

/// Deterministic-enough jitter without a dedicated RNG dependency.
fn jitter_ms(base: Duration) -> u64 {
    let range = (base.as_millis() as u64) / 5;
    if range == 0 {
        return 0;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos as u64) % (range + 1)
}

//! Per-account venue sessions.
//!
//! Each of the two trading accounts is one authenticated session: a REST
//! client for order placement and a WebSocket feed publishing the latest
//! top-of-book quote. Credential acquisition happens outside the engine;
//! this module only reads the credential files the login flow produced.

mod client;
pub mod credentials;
mod feed;
pub mod mock;
mod types;

pub use client::ParadexSession;
pub use credentials::SessionCredential;
pub use feed::{FeedConfig, FeedHandle, QuoteFeed};
pub use types::{
    OrderAck, OrderError, OrderRequest, OrderStatusReport, SessionApi, VenueOrderStatus,
};

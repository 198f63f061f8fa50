//! Order-path types and the venue session seam.

use crate::engine::{LegState, OrderSide, OrderType};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors on the order path.
///
/// The execution coordinator discriminates on these to decide between
/// rejection and timeout handling; everything else is a transport-class
/// failure treated as a rejection of that leg.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("order rejected by venue: {0}")]
    Rejected(String),
    #[error("venue credential expired or invalid")]
    Unauthorized,
    #[error("order request timed out")]
    Timeout,
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed venue payload: {0}")]
    Malformed(String),
}

/// A new order to submit on one session.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub market: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    #[serde(with = "rust_decimal::serde::str")]
    pub size: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl OrderRequest {
    pub fn market_order(market: &str, side: OrderSide, size: Decimal) -> Self {
        Self {
            market: market.to_string(),
            side,
            order_type: OrderType::Market,
            size,
            client_id: None,
        }
    }
}

/// Venue acknowledgement of a submitted order.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderAck {
    pub id: String,
    pub status: VenueOrderStatus,
}

/// Order status as the venue reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VenueOrderStatus {
    New,
    Untriggered,
    Open,
    Closed,
}

/// Point-in-time order status report.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderStatusReport {
    pub id: String,
    pub status: VenueOrderStatus,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub remaining_size: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub avg_fill_price: Option<Decimal>,
    #[serde(default)]
    pub cancel_reason: Option<String>,
}

impl OrderStatusReport {
    /// Map the venue status onto a leg state, or `None` while still working.
    ///
    /// A CLOSED order with nothing remaining and no cancel reason filled;
    /// CLOSED with a cancel reason was pulled by us or refused by the venue.
    pub fn leg_state(&self) -> Option<LegState> {
        match self.status {
            VenueOrderStatus::New | VenueOrderStatus::Untriggered | VenueOrderStatus::Open => None,
            VenueOrderStatus::Closed => match &self.cancel_reason {
                None => Some(LegState::Filled),
                Some(reason) if reason == "USER_CANCELED" => Some(LegState::Cancelled),
                Some(_) => Some(LegState::Rejected),
            },
        }
    }
}

/// One authenticated account session on the venue, as the execution
/// coordinator sees it. Implemented by the real REST client and by the
/// scripted mock used in tests.
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Display label for logs.
    fn label(&self) -> &str;

    /// Submit a new order; returns once the venue acknowledges it.
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck, OrderError>;

    /// Fetch the current status of a previously submitted order.
    async fn order_status(&self, order_id: &str) -> Result<OrderStatusReport, OrderError>;

    /// Cancel a resting order. Errors if the order already reached a
    /// terminal state on the venue.
    async fn cancel_order(&self, order_id: &str) -> Result<(), OrderError>;
}

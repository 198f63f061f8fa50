//! Paradex REST client for one authenticated account session.

use crate::session::credentials::SessionCredential;
use crate::session::types::{
    OrderAck, OrderError, OrderRequest, OrderStatusReport, SessionApi,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

/// Error payload the venue returns on refused requests.
#[derive(Debug, Deserialize)]
struct VenueError {
    #[serde(default)]
    message: String,
}

/// One authenticated trading session against the Paradex REST API.
pub struct ParadexSession {
    http: Client,
    label: String,
    base_url: String,
    token: String,
}

impl ParadexSession {
    /// Create a new session client from a loaded credential.
    pub fn new(label: &str, base_url: &str, credential: &SessionCredential) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            label: label.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: credential.token.clone(),
        })
    }

    fn map_request_error(error: reqwest::Error) -> OrderError {
        if error.is_timeout() {
            OrderError::Timeout
        } else {
            OrderError::Transport(error)
        }
    }

    /// Translate an HTTP error status into an order error.
    async fn check_status(response: Response) -> Result<Response, OrderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(OrderError::Unauthorized);
        }

        let message = match response.json::<VenueError>().await {
            Ok(body) if !body.message.is_empty() => body.message,
            _ => format!("HTTP {}", status),
        };
        Err(OrderError::Rejected(message))
    }
}

#[async_trait]
impl SessionApi for ParadexSession {
    fn label(&self) -> &str {
        &self.label
    }

    #[instrument(skip(self, request), fields(session = %self.label, market = %request.market, side = %request.side))]
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck, OrderError> {
        let url = format!("{}/orders", self.base_url);

        debug!(size = %request.size, "Submitting order");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await
            .map_err(Self::map_request_error)?;

        let response = Self::check_status(response).await?;

        response
            .json()
            .await
            .map_err(|e| OrderError::Malformed(e.to_string()))
    }

    #[instrument(skip(self), fields(session = %self.label))]
    async fn order_status(&self, order_id: &str) -> Result<OrderStatusReport, OrderError> {
        let url = format!("{}/orders/{}", self.base_url, order_id);

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(Self::map_request_error)?;

        let response = Self::check_status(response).await?;

        response
            .json()
            .await
            .map_err(|e| OrderError::Malformed(e.to_string()))
    }

    #[instrument(skip(self), fields(session = %self.label))]
    async fn cancel_order(&self, order_id: &str) -> Result<(), OrderError> {
        let url = format!("{}/orders/{}", self.base_url, order_id);

        let response = self
            .http
            .delete(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(Self::map_request_error)?;

        Self::check_status(response).await?;
        Ok(())
    }
}

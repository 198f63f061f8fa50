//! Scripted in-memory session for exercising the execution path without a
//! live venue. Each submitted order consumes the next scripted outcome.

use crate::session::types::{
    OrderAck, OrderError, OrderRequest, OrderStatusReport, SessionApi, VenueOrderStatus,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// What the mock venue does with the next submitted order.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    /// Acknowledge and fill immediately at the given price.
    FillAt(Decimal),
    /// Refuse the submission outright.
    RejectWith(&'static str),
    /// Acknowledge but never fill; the order stays OPEN until cancelled.
    StayOpen,
}

#[derive(Debug, Clone)]
struct MockOrder {
    request: OrderRequest,
    status: VenueOrderStatus,
    fill_price: Option<Decimal>,
    cancel_reason: Option<String>,
}

/// In-memory stand-in for one venue session.
pub struct MockSession {
    label: String,
    script: Mutex<VecDeque<ScriptedOutcome>>,
    orders: Mutex<HashMap<String, MockOrder>>,
    next_order_id: AtomicU64,
}

impl MockSession {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            script: Mutex::new(VecDeque::new()),
            orders: Mutex::new(HashMap::new()),
            next_order_id: AtomicU64::new(1),
        }
    }

    /// Queue the outcome for the next submitted order.
    pub fn script(&self, outcome: ScriptedOutcome) {
        self.script.lock().unwrap().push_back(outcome);
    }

    /// Number of orders this session has acknowledged.
    pub fn submitted_count(&self) -> usize {
        self.orders.lock().unwrap().len()
    }

    /// Sides of all acknowledged orders, in submission order id order.
    pub fn submitted_requests(&self) -> Vec<OrderRequest> {
        let orders = self.orders.lock().unwrap();
        let mut entries: Vec<_> = orders.iter().collect();
        entries.sort_by_key(|(id, _)| id.parse::<u64>().unwrap_or(0));
        entries
            .into_iter()
            .map(|(_, order)| order.request.clone())
            .collect()
    }
}

#[async_trait]
impl SessionApi for MockSession {
    fn label(&self) -> &str {
        &self.label
    }

    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck, OrderError> {
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ScriptedOutcome::FillAt(Decimal::ZERO));

        let (status, fill_price) = match outcome {
            ScriptedOutcome::FillAt(price) => (VenueOrderStatus::Closed, Some(price)),
            ScriptedOutcome::RejectWith(message) => {
                return Err(OrderError::Rejected(message.to_string()));
            }
            ScriptedOutcome::StayOpen => (VenueOrderStatus::Open, None),
        };

        let order_id = self.next_order_id.fetch_add(1, Ordering::SeqCst).to_string();
        self.orders.lock().unwrap().insert(
            order_id.clone(),
            MockOrder {
                request: request.clone(),
                status,
                fill_price,
                cancel_reason: None,
            },
        );

        Ok(OrderAck {
            id: order_id,
            status,
        })
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderStatusReport, OrderError> {
        let orders = self.orders.lock().unwrap();
        let order = orders
            .get(order_id)
            .ok_or_else(|| OrderError::Malformed(format!("unknown order {}", order_id)))?;

        Ok(OrderStatusReport {
            id: order_id.to_string(),
            status: order.status,
            remaining_size: match order.status {
                VenueOrderStatus::Closed if order.cancel_reason.is_none() => Some(Decimal::ZERO),
                _ => Some(order.request.size),
            },
            avg_fill_price: order.fill_price,
            cancel_reason: order.cancel_reason.clone(),
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), OrderError> {
        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| OrderError::Malformed(format!("unknown order {}", order_id)))?;

        if order.status == VenueOrderStatus::Closed {
            return Err(OrderError::Rejected("order already closed".to_string()));
        }

        order.status = VenueOrderStatus::Closed;
        order.cancel_reason = Some("USER_CANCELED".to_string());
        Ok(())
    }
}

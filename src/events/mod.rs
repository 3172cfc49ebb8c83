use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Handle for publishing order events onto the bounded event channel.
#[derive(Clone, Debug)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Facts emitted after an order operation has taken effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    OrderCreated {
        order_no: String,
        user_id: i32,
        total_amount: Decimal,
        from_cart: bool,
    },
    OrderPaid {
        order_no: String,
        user_id: i32,
        amount: Decimal,
    },
    OrderCancelled {
        order_no: String,
        user_id: i32,
        by_admin: bool,
        refunded: Option<Decimal>,
    },
    OrderShipped {
        order_no: String,
        user_id: i32,
    },
    OrderCompleted {
        order_no: String,
        user_id: i32,
    },
    OrderRefunded {
        order_no: String,
        user_id: i32,
        amount: Decimal,
    },
}

impl Event {
    pub fn order_no(&self) -> &str {
        match self {
            Event::OrderCreated { order_no, .. }
            | Event::OrderPaid { order_no, .. }
            | Event::OrderCancelled { order_no, .. }
            | Event::OrderShipped { order_no, .. }
            | Event::OrderCompleted { order_no, .. }
            | Event::OrderRefunded { order_no, .. } => order_no,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::OrderCreated { .. } => "order_created",
            Event::OrderPaid { .. } => "order_paid",
            Event::OrderCancelled { .. } => "order_cancelled",
            Event::OrderShipped { .. } => "order_shipped",
            Event::OrderCompleted { .. } => "order_completed",
            Event::OrderRefunded { .. } => "order_refunded",
        }
    }
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) -> usize {
    info!("Starting event processing loop");
    let mut processed = 0;

    while let Some(event) = rx.recv().await {
        processed += 1;
        match serde_json::to_string(&event) {
            Ok(payload) => info!(
                event = event.name(),
                order_no = event.order_no(),
                %payload,
                "Order event"
            ),
            Err(e) => info!(event = event.name(), order_no = event.order_no(), error = %e, "Order event"),
        }
    }

    debug!(processed, "Event channel closed");
    processed
}

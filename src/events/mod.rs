use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::order::OrderStatus;

/// Default buffer of the in-process event channel
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Handle used by services to publish lifecycle events.
#[derive(Clone, Debug)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a sender together with its receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Publishes an event, logging instead of failing when the consumer is gone.
    /// Events are informational; the state change they describe is already committed.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("{}", e);
        }
    }
}

/// Order workflow events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        customer_id: Uuid,
        shop_id: Uuid,
    },
    AgentAssigned {
        order_id: Uuid,
        agent_id: Uuid,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    AgentReleased {
        order_id: Uuid,
        agent_id: Uuid,
    },
    AgentAvailabilityChanged {
        agent_id: Uuid,
        is_available: bool,
    },
}

/// Drains the event channel, logging each event. Returns when every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::OrderCreated {
                order_id,
                customer_id,
                shop_id,
            } => {
                info!(%order_id, %customer_id, %shop_id, "order created");
            }
            Event::AgentAssigned { order_id, agent_id } => {
                info!(%order_id, %agent_id, "agent assigned");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(%order_id, %old_status, %new_status, "order status changed");
            }
            Event::AgentReleased { order_id, agent_id } => {
                info!(%order_id, %agent_id, "agent released");
            }
            Event::AgentAvailabilityChanged {
                agent_id,
                is_available,
            } => {
                info!(%agent_id, is_available, "agent availability changed");
            }
        }
    }

    info!("Event processing loop stopped");
}

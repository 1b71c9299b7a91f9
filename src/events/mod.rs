use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::order::OrderStatus;

/// Events emitted by the services after their transactions commit.
///
/// Dispatch is fire-and-forget: a failure to enqueue or handle an event is
/// logged and never propagated back into the transaction that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Order events
    OrderCreated {
        order_id: Uuid,
        order_number: String,
        user_id: Uuid,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    OrderCancelled {
        order_id: Uuid,
        user_id: Uuid,
    },
    OrderDeleted {
        order_id: Uuid,
    },

    // Inventory events
    StockReserved {
        product_id: Uuid,
        quantity: i32,
    },
    StockReleased {
        product_id: Uuid,
        quantity: i32,
    },

    // Cart events
    CartItemAdded {
        user_id: Uuid,
        product_id: Uuid,
    },
    CartCleared {
        user_id: Uuid,
    },

    // Promotion events
    PromotionCreated(Uuid),
    PromotionApplied {
        promotion_id: Uuid,
        order_id: Uuid,
    },
    PromotionDeactivated(Uuid),
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event, surfacing the failure to the caller.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging a warning on failure. This is the path used
    /// after a transaction has committed: the commit already happened, so
    /// the worst case is a missed notification, never a lost order.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Dropping event: {}", e);
        }
    }
}

/// Consumes events and dispatches the downstream side effects
/// (notification email, admin alerts). Handler failures are logged and
/// swallowed; this loop must never feed back into request handling.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::OrderCreated {
                order_id,
                ref order_number,
                user_id,
            } => {
                // Confirmation email + admin notification hook.
                info!(
                    %order_id,
                    %order_number,
                    %user_id,
                    "Dispatching order confirmation notification"
                );
            }
            Event::OrderCancelled { order_id, user_id } => {
                info!(%order_id, %user_id, "Dispatching order cancellation notification");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(
                    %order_id,
                    %old_status,
                    %new_status,
                    "Order status changed"
                );
            }
            Event::StockReserved {
                product_id,
                quantity,
            } => {
                info!(%product_id, quantity, "Stock reserved");
            }
            Event::StockReleased {
                product_id,
                quantity,
            } => {
                info!(%product_id, quantity, "Stock released");
            }
            other => {
                info!("No specific handler for event: {:?}", other);
            }
        }
    }

    warn!("Event processing loop has ended");
}

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use courier_api::service::DeliveryService;
use courier_broker::QueueHandler;
use courier_types::events::{LoginEvent, MessageEvent};

/// Reacts to message events: retries the fan-out push off the request path.
///
/// The originating request already persisted the message if its inline
/// attempt failed, so this handler never re-persists; it acks once the
/// attempt completes, success or not. The durable-store copy, not the queue
/// entry, is what guarantees eventual delivery.
pub struct MessageEventHandler {
    service: Arc<DeliveryService>,
}

impl MessageEventHandler {
    pub fn new(service: Arc<DeliveryService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl QueueHandler for MessageEventHandler {
    async fn handle(&self, body: &[u8]) -> anyhow::Result<()> {
        let event: MessageEvent = match serde_json::from_slice(body) {
            Ok(event) => event,
            Err(e) => {
                // Unparseable envelopes are acked away; redelivering them
                // cannot succeed.
                error!("dropping malformed message event: {}", e);
                return Ok(());
            }
        };

        if event.address_list.is_empty() {
            return Ok(());
        }

        let delivered = self
            .service
            .fan_out(&event.address_list, &event.msg_json)
            .await;
        info!(
            receiver_id = event.msg_json.receiver_id,
            addresses = event.address_list.len(),
            delivered,
            "message event processed"
        );
        Ok(())
    }
}

/// Reacts to login events: redelivers every pending message for the user to
/// the address that just became reachable, deleting the delivered ones.
pub struct LoginEventHandler {
    service: Arc<DeliveryService>,
}

impl LoginEventHandler {
    pub fn new(service: Arc<DeliveryService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl QueueHandler for LoginEventHandler {
    async fn handle(&self, body: &[u8]) -> anyhow::Result<()> {
        let event: LoginEvent = match serde_json::from_slice(body) {
            Ok(event) => event,
            Err(e) => {
                error!("dropping malformed login event: {}", e);
                return Ok(());
            }
        };

        let addresses = vec![event.user_address.clone()];
        // A store error propagates, leaving the event unacked so redelivery
        // retries the batch.
        let (delivered, remaining) = self
            .service
            .deliver_pending(event.user_id, &addresses)
            .await?;

        info!(
            user_id = event.user_id,
            delivered, remaining, "login event processed"
        );
        Ok(())
    }
}

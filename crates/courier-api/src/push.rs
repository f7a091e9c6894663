use std::time::Duration;

use anyhow::Result;
use tracing::debug;

use courier_types::api::MessagePayload;

/// HTTP push client for direct delivery to receiver addresses.
///
/// Every request carries the configured timeout, so one unreachable peer
/// cannot stall the caller past it.
pub struct Pusher {
    client: reqwest::Client,
}

impl Pusher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Posts the message to one address; connection errors and non-success
    /// statuses both read as "unreachable".
    pub async fn push(&self, address: &str, payload: &MessagePayload) -> bool {
        match self.client.post(address).json(payload).send().await {
            Ok(response) => {
                let ok = response.status().is_success();
                debug!(address, status = %response.status(), "push attempt finished");
                ok
            }
            Err(e) => {
                debug!(address, "push attempt failed: {}", e);
                false
            }
        }
    }

    /// Fan-out: attempts every address in the list, not first-match.
    /// Delivery counts as successful if at least one address accepted it.
    pub async fn push_to_all(&self, addresses: &[String], payload: &MessagePayload) -> bool {
        let mut delivered = false;
        for address in addresses {
            if self.push(address, payload).await {
                delivered = true;
            }
        }
        delivered
    }
}

use serde::{Deserialize, Serialize};

use crate::api::MessagePayload;

/// Exchange all relay queues bind to.
pub const EXCHANGE: &str = "courier";

/// Queue carrying submitted messages for off-request-path delivery.
pub const MESSAGE_QUEUE: &str = "messages";

/// Queue carrying login notifications that trigger redelivery.
pub const LOGIN_QUEUE: &str = "logins";

/// Envelope published on the message queue: the receiver's known addresses
/// at submission time plus the message body to push.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    pub address_list: Vec<String>,
    pub msg_json: MessagePayload,
}

/// Envelope published on the login queue: the user that just became
/// reachable and the address they registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginEvent {
    pub user_id: i64,
    pub user_address: String,
}

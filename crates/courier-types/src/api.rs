use serde::{Deserialize, Serialize};

// -- JWT Claims --

/// JWT claims shared between courier-presence (token issue/validation) and
/// courier-api (request middleware). Canonical definition lives here in
/// courier-types to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub username: String,
    pub exp: usize,
}

// -- Accounts --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateUserRequest {
    pub username: String,
    pub phone_number: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct CreateUserResponse {
    pub user_id: i64,
}

#[derive(Debug, Serialize)]
pub struct FindUserResponse {
    pub user_id: i64,
    pub public_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeleteUserRequest {
    pub user_id: i64,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    /// Endpoint the client is reachable on for direct pushes.
    pub user_address: String,
    pub public_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub msg: String,
    pub user_id: i64,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogoutRequest {
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub msg: String,
    pub username: String,
}

// -- Messages --

/// Message submission body. The same shape travels inside the broker
/// envelope and in direct pushes to receiver addresses, so it derives both
/// Serialize and Deserialize.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessagePayload {
    pub message: String,
    pub sender_id: i64,
    pub sender_username: String,
    pub receiver_id: i64,
    pub send_date: String,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub msg: String,
    /// "delivered" when at least one address took the inline push,
    /// "queued" when the message was persisted for redelivery.
    pub status: String,
}

use std::sync::Arc;

use argon2::password_hash::{SaltString, rand_core::OsRng};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use tracing::{debug, info, warn};

use courier_broker::Broker;
use courier_presence::{PresenceStore, TokenManager};
use courier_types::api::{Claims, CreateUserRequest, LoginRequest, MessagePayload};
use courier_types::events::{LOGIN_QUEUE, LoginEvent, MESSAGE_QUEUE, MessageEvent};

use crate::error::ApiError;
use crate::push::Pusher;

/// Where a submitted message ended up: pushed to a live address inline, or
/// persisted for redelivery at the receiver's next login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Queued,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Delivered => "delivered",
            DeliveryOutcome::Queued => "queued",
        }
    }
}

/// Core delivery logic: decides direct push vs store-and-forward per
/// message, and owns the authorization rules for submission and login.
pub struct DeliveryService {
    store: Arc<PresenceStore>,
    tokens: TokenManager,
    broker: Arc<dyn Broker>,
    pusher: Pusher,
}

impl DeliveryService {
    pub fn new(
        store: Arc<PresenceStore>,
        tokens: TokenManager,
        broker: Arc<dyn Broker>,
        pusher: Pusher,
    ) -> Self {
        Self {
            store,
            tokens,
            broker,
            pusher,
        }
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn store(&self) -> &PresenceStore {
        &self.store
    }

    // -- Accounts --

    pub fn create_user(&self, req: &CreateUserRequest) -> Result<i64, ApiError> {
        if req.username.is_empty() || req.password.is_empty() || req.phone_number.is_empty() {
            return Err(ApiError::Validation("Validation error.".into()));
        }

        let db = self.store.durable();
        if db.user_by_username(&req.username)?.is_some() {
            return Err(ApiError::Conflict("Username already exists.".into()));
        }
        if db.phone_exists(&req.phone_number)? {
            return Err(ApiError::Conflict("Phone number already exists.".into()));
        }

        let password_hash = hash_password(&req.password)?;
        let user_id = db.create_user(&req.username, &req.phone_number, &password_hash)?;
        self.store.cache_identity(user_id, &req.username);

        info!(user_id, username = %req.username, "user created");
        Ok(user_id)
    }

    /// Looks a user up by username for authorized callers: id plus the
    /// public key registered at login, if any.
    pub fn find_user(&self, username: &str) -> Result<(i64, Option<String>), ApiError> {
        let user_id = self
            .store
            .user_id_by_name(username)?
            .ok_or_else(|| ApiError::NotFound(format!("User \"{}\" not found.", username)))?;

        let public_key = self.store.public_key(user_id)?;
        Ok((user_id, public_key))
    }

    /// Cascades deletion of token, public key, address records, and pending
    /// messages. Returns false (a no-op, not an error) when the user does
    /// not exist.
    pub fn delete_user(&self, user_id: i64) -> Result<bool, ApiError> {
        let db = self.store.durable();
        if db.user_by_id(user_id)?.is_none() {
            return Ok(false);
        }

        self.store.delete_token(user_id)?;
        self.store.delete_public_key(user_id)?;
        self.store.delete_addresses(user_id)?;
        db.delete_user_messages(user_id)?;
        db.delete_user(user_id)?;
        self.store.evict(user_id);

        info!(user_id, "user deleted");
        Ok(true)
    }

    // -- Sessions --

    /// Verifies credentials, records the address as the user's newest
    /// reachable endpoint, issues (or reuses) a token, and publishes the
    /// login event that triggers redelivery of pending messages.
    pub async fn login(&self, req: &LoginRequest) -> Result<(i64, String), ApiError> {
        let db = self.store.durable();
        let user = db
            .user_by_username(&req.username)?
            .ok_or(ApiError::NotAuthorized)?;

        if !verify_password(&user.password, &req.password) {
            return Err(ApiError::NotAuthorized);
        }

        self.store.cache_identity(user.id, &user.username);
        self.store.add_address(user.id, &req.user_address)?;
        if let Some(public_key) = &req.public_key {
            self.store.set_public_key(user.id, public_key)?;
        }

        let token = match self.tokens.current_valid(user.id)? {
            Some(token) => token,
            None => self.tokens.issue(user.id, &user.username)?,
        };

        let event = LoginEvent {
            user_id: user.id,
            user_address: req.user_address.clone(),
        };
        self.publish(LOGIN_QUEUE, &serde_json::to_vec(&event).map_err(anyhow::Error::from)?)
            .await;

        info!(user_id = user.id, "login successful");
        Ok((user.id, token))
    }

    /// Revokes the stored token. An unknown username gets the same response
    /// as a malformed request, so the route does not reveal whether the
    /// account exists.
    pub fn logout(&self, username: &str) -> Result<(), ApiError> {
        let user_id = self
            .store
            .user_id_by_name(username)?
            .ok_or_else(|| ApiError::Validation("Validation error.".into()))?;

        self.tokens.revoke(user_id)?;
        info!(user_id, "logout successful");
        Ok(())
    }

    // -- Messages --

    /// Accepts a message for delivery.
    ///
    /// The inline fan-out push is a best-effort fast path; the published
    /// broker event is the guaranteed path. The message is persisted at most
    /// once per submission, and only when no address took the inline push.
    pub async fn send_message(
        &self,
        claims: &Claims,
        msg: &MessagePayload,
    ) -> Result<DeliveryOutcome, ApiError> {
        let db = self.store.durable();
        if db.user_by_id(msg.receiver_id)?.is_none() {
            return Err(ApiError::Validation("Validation error.".into()));
        }

        // A sender claiming someone else's username is spoofed, whatever
        // token it arrived with.
        let on_record = self.store.username_by_id(msg.sender_id)?.unwrap_or_default();
        if msg.sender_username != on_record {
            debug!(
                claimed = %msg.sender_username,
                recorded = %on_record,
                token_user = claims.sub,
                "sender identity mismatch"
            );
            return Err(ApiError::NotAuthorized);
        }

        let addresses = self.store.addresses(msg.receiver_id)?;
        let delivered = if addresses.is_empty() {
            false
        } else {
            self.pusher.push_to_all(&addresses, msg).await
        };

        if !delivered {
            db.insert_message(msg.sender_id, msg.receiver_id, &msg.sender_username, &msg.message)?;
            debug!(receiver_id = msg.receiver_id, "message persisted for redelivery");
        }

        let event = MessageEvent {
            address_list: addresses,
            msg_json: msg.clone(),
        };
        self.publish(MESSAGE_QUEUE, &serde_json::to_vec(&event).map_err(anyhow::Error::from)?)
            .await;

        Ok(if delivered {
            DeliveryOutcome::Delivered
        } else {
            DeliveryOutcome::Queued
        })
    }

    /// Redelivers every pending message for a user to the given addresses;
    /// delivered rows are deleted, failures stay pending for the next login.
    /// Returns (delivered, remaining).
    pub async fn deliver_pending(
        &self,
        user_id: i64,
        addresses: &[String],
    ) -> anyhow::Result<(usize, usize)> {
        let pending = self.store.durable().messages_for(user_id)?;
        let total = pending.len();
        let mut delivered_ids = Vec::new();

        for row in pending {
            let payload = MessagePayload {
                message: row.body,
                sender_id: row.sender_id,
                sender_username: row.sender_username,
                receiver_id: row.receiver_id,
                send_date: row.received_at,
            };

            if self.pusher.push_to_all(addresses, &payload).await {
                delivered_ids.push(row.id);
            }
        }

        self.store.durable().delete_messages(&delivered_ids)?;
        Ok((delivered_ids.len(), total - delivered_ids.len()))
    }

    /// Fan-out push used by the relay worker for message events.
    pub async fn fan_out(&self, addresses: &[String], payload: &MessagePayload) -> bool {
        self.pusher.push_to_all(addresses, payload).await
    }

    /// Broker publish with the failure policy for the request path: by the
    /// time anything is published the message is already delivered or
    /// persisted, so a failed publish only costs the fast path.
    async fn publish(&self, queue: &str, body: &[u8]) {
        if let Err(e) = self.broker.publish(queue, body).await {
            warn!(queue, "broker publish failed: {}", e);
        }
    }
}

fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("password hashing failed: {}", e)))
}

fn verify_password(stored_hash: &str, password: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

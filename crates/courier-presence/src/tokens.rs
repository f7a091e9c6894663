use std::sync::Arc;

use anyhow::Result;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use thiserror::Error;
use tracing::debug;

use courier_types::api::Claims;

use crate::PresenceStore;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authorization header missing")]
    MissingHeader,

    #[error("token malformed")]
    Malformed,

    #[error("token expired")]
    Expired,

    /// Structurally valid token that does not match the stored canonical one
    /// (revoked at logout, superseded by rotation, or forged for another
    /// user's session).
    #[error("token does not match the active session")]
    Mismatch,

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Issues and validates signed bearer tokens, layered over PresenceStore for
/// stateful revocation. Pure signature validation alone would make logout a
/// no-op for unexpired tokens, so both checks are required.
pub struct TokenManager {
    secret: String,
    ttl_minutes: i64,
    store: Arc<PresenceStore>,
}

impl TokenManager {
    pub fn new(secret: String, ttl_minutes: i64, store: Arc<PresenceStore>) -> Self {
        Self {
            secret,
            ttl_minutes,
            store,
        }
    }

    /// Creates a signed token and stores it as the user's canonical one; any
    /// prior token is superseded.
    pub fn issue(&self, user_id: i64, username: &str) -> Result<String> {
        let claims = Claims {
            sub: user_id,
            username: username.to_string(),
            exp: (chrono::Utc::now() + chrono::Duration::minutes(self.ttl_minutes)).timestamp()
                as usize,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?;

        self.store.set_token(user_id, &token)?;
        debug!(user_id, "token issued");
        Ok(token)
    }

    /// Validates a bearer header value. A token authorizes a call only if it
    /// passes signature/expiry verification AND equals the token currently
    /// stored for the user in its claims.
    pub fn validate(&self, auth_header: Option<&str>) -> Result<Claims, AuthError> {
        let header = auth_header.ok_or(AuthError::MissingHeader)?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or(AuthError::MissingHeader)?;

        let claims = self.verify(token)?;

        let stored = self.store.token(claims.sub)?;
        match stored {
            Some(stored) if stored == token => Ok(claims),
            _ => Err(AuthError::Mismatch),
        }
    }

    /// Returns the stored token only while it still verifies; an expired or
    /// garbled stored token reads as absent so login issues a fresh one.
    pub fn current_valid(&self, user_id: i64) -> Result<Option<String>> {
        let Some(token) = self.store.token(user_id)? else {
            return Ok(None);
        };

        match self.verify(&token) {
            Ok(_) => Ok(Some(token)),
            Err(_) => Ok(None),
        }
    }

    /// Deletes the stored token; previously issued tokens fail validation
    /// with Mismatch from here on, expired or not.
    pub fn revoke(&self, user_id: i64) -> Result<()> {
        self.store.delete_token(user_id)?;
        debug!(user_id, "token revoked");
        Ok(())
    }

    fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            _ => AuthError::Malformed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_db::Database;

    fn manager(ttl_minutes: i64) -> (TokenManager, i64) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let user_id = db.create_user("alice", "123", "hash").unwrap();
        let store = Arc::new(PresenceStore::new(db));
        (
            TokenManager::new("test-secret".into(), ttl_minutes, store),
            user_id,
        )
    }

    fn bearer(token: &str) -> String {
        format!("Bearer {}", token)
    }

    #[test]
    fn issued_token_validates() {
        let (tokens, user_id) = manager(60);
        let token = tokens.issue(user_id, "alice").unwrap();

        let claims = tokens.validate(Some(&bearer(&token))).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.username, "alice");
    }

    #[test]
    fn missing_header_is_rejected() {
        let (tokens, _) = manager(60);
        assert!(matches!(
            tokens.validate(None),
            Err(AuthError::MissingHeader)
        ));
        assert!(matches!(
            tokens.validate(Some("Basic abc")),
            Err(AuthError::MissingHeader)
        ));
    }

    #[test]
    fn garbage_token_is_malformed() {
        let (tokens, _) = manager(60);
        assert!(matches!(
            tokens.validate(Some("Bearer not.a.jwt")),
            Err(AuthError::Malformed)
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let (tokens, user_id) = manager(-5);
        let token = tokens.issue(user_id, "alice").unwrap();

        assert!(matches!(
            tokens.validate(Some(&bearer(&token))),
            Err(AuthError::Expired)
        ));
        // And it no longer reads as reusable at login time.
        assert!(tokens.current_valid(user_id).unwrap().is_none());
    }

    #[test]
    fn revoked_token_mismatches_before_expiry() {
        let (tokens, user_id) = manager(60);
        let token = tokens.issue(user_id, "alice").unwrap();

        tokens.revoke(user_id).unwrap();

        assert!(matches!(
            tokens.validate(Some(&bearer(&token))),
            Err(AuthError::Mismatch)
        ));
    }

    #[test]
    fn rotation_invalidates_the_old_token() {
        let (tokens, user_id) = manager(60);
        let old = tokens.issue(user_id, "alice").unwrap();
        // Force distinct payloads: exp has second granularity.
        std::thread::sleep(std::time::Duration::from_millis(1100));
        let new = tokens.issue(user_id, "alice").unwrap();
        assert_ne!(old, new);

        assert!(matches!(
            tokens.validate(Some(&bearer(&old))),
            Err(AuthError::Mismatch)
        ));
        assert!(tokens.validate(Some(&bearer(&new))).is_ok());
    }

    #[test]
    fn valid_stored_token_is_reusable() {
        let (tokens, user_id) = manager(60);
        let token = tokens.issue(user_id, "alice").unwrap();

        assert_eq!(tokens.current_valid(user_id).unwrap(), Some(token));
    }
}

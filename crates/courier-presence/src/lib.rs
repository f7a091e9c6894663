pub mod tokens;
pub mod volatile;

use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use courier_db::Database;
use volatile::VolatileCache;

pub use tokens::{AuthError, TokenManager};

/// Dual-tier presence/session store.
///
/// The durable tier is the source of truth; the volatile tier only exists to
/// skip round-trips for hot session data. Reads go volatile-first and
/// repopulate it on a durable hit; writes land in the durable tier first so a
/// failed write never leaves the cache ahead of the store.
pub struct PresenceStore {
    volatile: VolatileCache,
    durable: Arc<Database>,
}

impl PresenceStore {
    pub fn new(durable: Arc<Database>) -> Self {
        Self {
            volatile: VolatileCache::new(),
            durable,
        }
    }

    pub fn durable(&self) -> &Database {
        &self.durable
    }

    // -- Tokens --

    pub fn token(&self, user_id: i64) -> Result<Option<String>> {
        if let Some(token) = self.volatile.token(user_id) {
            return Ok(Some(token));
        }

        match self.durable.token(user_id)? {
            Some(token) => {
                self.volatile.set_token(user_id, token.clone());
                Ok(Some(token))
            }
            None => Ok(None),
        }
    }

    pub fn set_token(&self, user_id: i64, token: &str) -> Result<()> {
        self.durable.upsert_token(user_id, token)?;
        self.volatile.set_token(user_id, token.to_string());
        Ok(())
    }

    pub fn delete_token(&self, user_id: i64) -> Result<()> {
        self.durable.delete_token(user_id)?;
        self.volatile.remove_token(user_id);
        Ok(())
    }

    // -- Public keys --

    pub fn public_key(&self, user_id: i64) -> Result<Option<String>> {
        if let Some(key) = self.volatile.public_key(user_id) {
            return Ok(Some(key));
        }

        match self.durable.public_key(user_id)? {
            Some(key) => {
                self.volatile.set_public_key(user_id, key.clone());
                Ok(Some(key))
            }
            None => Ok(None),
        }
    }

    /// Write-once per user: the key stored at first login stays canonical.
    pub fn set_public_key(&self, user_id: i64, key: &str) -> Result<()> {
        self.durable.insert_public_key(user_id, key)?;
        // Cache whatever actually won the write
        if let Some(stored) = self.durable.public_key(user_id)? {
            self.volatile.set_public_key(user_id, stored);
        }
        Ok(())
    }

    pub fn delete_public_key(&self, user_id: i64) -> Result<()> {
        self.durable.delete_public_key(user_id)?;
        self.volatile.remove_public_key(user_id);
        Ok(())
    }

    // -- Identity (username <-> id) --

    pub fn username_by_id(&self, user_id: i64) -> Result<Option<String>> {
        if let Some(name) = self.volatile.username(user_id) {
            return Ok(Some(name));
        }

        match self.durable.username_by_id(user_id)? {
            Some(name) => {
                self.volatile.set_identity(user_id, &name);
                Ok(Some(name))
            }
            None => Ok(None),
        }
    }

    pub fn user_id_by_name(&self, username: &str) -> Result<Option<i64>> {
        if let Some(id) = self.volatile.user_id(username) {
            return Ok(Some(id));
        }

        match self.durable.user_id_by_name(username)? {
            Some(id) => {
                self.volatile.set_identity(id, username);
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    /// The users table is written by account creation; this only warms the
    /// volatile tier for the id/username pair.
    pub fn cache_identity(&self, user_id: i64, username: &str) {
        self.volatile.set_identity(user_id, username);
    }

    // -- Addresses --

    pub fn addresses(&self, user_id: i64) -> Result<Vec<String>> {
        let cached = self.volatile.addresses(user_id);
        if !cached.is_empty() {
            return Ok(cached);
        }

        let stored = self.durable.addresses(user_id)?;
        if !stored.is_empty() {
            debug!(user_id, count = stored.len(), "address list repopulated from durable tier");
            self.volatile.set_addresses(user_id, stored.clone());
        }
        Ok(stored)
    }

    /// Multi-valued set: appends and dedupes, never overwrites.
    pub fn add_address(&self, user_id: i64, address: &str) -> Result<()> {
        self.durable.insert_user_address(user_id, address)?;
        self.volatile.add_address(user_id, address);
        Ok(())
    }

    pub fn delete_addresses(&self, user_id: i64) -> Result<()> {
        self.durable.delete_user_addresses(user_id)?;
        self.volatile.remove_addresses(user_id);
        Ok(())
    }

    /// Drops every volatile entry for a user; used by account deletion.
    pub fn evict(&self, user_id: i64) {
        self.volatile.remove_token(user_id);
        self.volatile.remove_public_key(user_id);
        self.volatile.remove_addresses(user_id);
        self.volatile.remove_identity(user_id);
    }
}

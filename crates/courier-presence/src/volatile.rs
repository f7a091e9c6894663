use std::collections::HashMap;
use std::sync::RwLock;

/// Process-lifetime cache tier. Holds hot session data so lookups skip the
/// durable store; always reconstructible from it, so losing this state on
/// restart is harmless.
#[derive(Default)]
pub struct VolatileCache {
    tokens: RwLock<HashMap<i64, String>>,
    public_keys: RwLock<HashMap<i64, String>>,
    usernames: RwLock<HashMap<i64, String>>,
    user_ids: RwLock<HashMap<String, i64>>,
    addresses: RwLock<HashMap<i64, Vec<String>>>,
}

impl VolatileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self, user_id: i64) -> Option<String> {
        self.tokens.read().unwrap().get(&user_id).cloned()
    }

    pub fn set_token(&self, user_id: i64, token: String) {
        self.tokens.write().unwrap().insert(user_id, token);
    }

    pub fn remove_token(&self, user_id: i64) {
        self.tokens.write().unwrap().remove(&user_id);
    }

    pub fn public_key(&self, user_id: i64) -> Option<String> {
        self.public_keys.read().unwrap().get(&user_id).cloned()
    }

    pub fn set_public_key(&self, user_id: i64, key: String) {
        self.public_keys.write().unwrap().insert(user_id, key);
    }

    pub fn remove_public_key(&self, user_id: i64) {
        self.public_keys.write().unwrap().remove(&user_id);
    }

    pub fn username(&self, user_id: i64) -> Option<String> {
        self.usernames.read().unwrap().get(&user_id).cloned()
    }

    pub fn user_id(&self, username: &str) -> Option<i64> {
        self.user_ids.read().unwrap().get(username).copied()
    }

    pub fn set_identity(&self, user_id: i64, username: &str) {
        self.usernames
            .write()
            .unwrap()
            .insert(user_id, username.to_string());
        self.user_ids
            .write()
            .unwrap()
            .insert(username.to_string(), user_id);
    }

    pub fn remove_identity(&self, user_id: i64) {
        if let Some(username) = self.usernames.write().unwrap().remove(&user_id) {
            self.user_ids.write().unwrap().remove(&username);
        }
    }

    pub fn addresses(&self, user_id: i64) -> Vec<String> {
        self.addresses
            .read()
            .unwrap()
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Appends with dedup rather than overwriting: a user reachable on two
    /// devices keeps both endpoints.
    pub fn add_address(&self, user_id: i64, address: &str) {
        let mut map = self.addresses.write().unwrap();
        let list = map.entry(user_id).or_default();
        if !list.iter().any(|a| a == address) {
            list.push(address.to_string());
        }
    }

    pub fn set_addresses(&self, user_id: i64, list: Vec<String>) {
        self.addresses.write().unwrap().insert(user_id, list);
    }

    pub fn remove_addresses(&self, user_id: i64) {
        self.addresses.write().unwrap().remove(&user_id);
    }
}

//! Session identity: the per-tab session identifier and the bearer token
//! used to authenticate deliveries.

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use parking_lot::RwLock;
use uuid::Uuid;

/// Durable, cross-tab storage key holding the bearer token set by login.
pub const TOKEN_STORAGE_KEY: &str = "automatia_token";
/// Tab-scoped storage key holding the session identifier.
pub const SESSION_STORAGE_KEY: &str = "automatia_session_id";

/// Key/value storage the embedder maps onto browser storage.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// Process-local storage.
#[derive(Default)]
pub struct MemoryStorage {
    entries: DashMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    fn set(&self, key: &str, value: &str) {
        self.entries.insert(key.to_owned(), value.to_owned());
    }

    fn remove(&self, key: &str) {
        self.entries.remove(key);
    }
}

/// Resolves the session identifier and bearer token for outgoing events.
pub struct SessionIdentity {
    tab_storage: Arc<dyn Storage>,
    durable_storage: Arc<dyn Storage>,
    session_id: OnceLock<String>,
    fallback_token: RwLock<Option<String>>,
}

impl Default for SessionIdentity {
    fn default() -> Self {
        Self::new(Arc::new(MemoryStorage::new()), Arc::new(MemoryStorage::new()))
    }
}

impl SessionIdentity {
    pub fn new(tab_storage: Arc<dyn Storage>, durable_storage: Arc<dyn Storage>) -> Self {
        Self {
            tab_storage,
            durable_storage,
            session_id: OnceLock::new(),
            fallback_token: RwLock::new(None),
        }
    }

    /// The tab's session identifier, created and persisted on first use.
    pub fn session_id(&self) -> &str {
        self.session_id.get_or_init(|| {
            if let Some(existing) = self.tab_storage.get(SESSION_STORAGE_KEY) {
                return existing;
            }
            let generated = Uuid::new_v4().to_string();
            self.tab_storage.set(SESSION_STORAGE_KEY, &generated);
            generated
        })
    }

    /// Token from durable storage, else the one set on this instance.
    pub fn token(&self) -> Option<String> {
        self.durable_storage
            .get(TOKEN_STORAGE_KEY)
            .filter(|t| !t.is_empty())
            .or_else(|| self.fallback_token.read().clone())
    }

    pub fn set_token(&self, token: &str) {
        *self.fallback_token.write() = Some(token.to_owned());
        self.durable_storage.set(TOKEN_STORAGE_KEY, token);
    }

    pub fn clear_token(&self) {
        *self.fallback_token.write() = None;
        self.durable_storage.remove(TOKEN_STORAGE_KEY);
    }
}

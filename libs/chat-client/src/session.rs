use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{error::StorageError, storage::SharedKeyValueStore};

/// Conversation identity correlating a user's messages across restarts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub sender_id: String,
    /// Epoch milliseconds of creation or the last successful inbound exchange.
    #[serde(rename = "timestamp")]
    pub touched_at_ms: i64,
}

impl Session {
    pub fn new() -> Self {
        Self {
            sender_id: Uuid::new_v4().to_string(),
            touched_at_ms: now_ms(),
        }
    }

    pub fn is_expired(&self, timeout: Duration, now_ms: i64) -> bool {
        let age = now_ms.saturating_sub(self.touched_at_ms);
        age > i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the current [`Session`] and its persisted copy.
///
/// Storage faults are never surfaced: an unreadable entry counts as absent
/// and a failed write only leaves the in-memory session authoritative.
pub struct SessionStore {
    storage: SharedKeyValueStore,
    key: String,
    timeout: Duration,
    current: Mutex<Session>,
}

pub type SharedSessionStore = Arc<SessionStore>;

impl SessionStore {
    /// Builds the store and loads (or creates) the session right away.
    pub fn open(storage: SharedKeyValueStore, key: impl Into<String>, timeout: Duration) -> Self {
        let store = Self {
            storage,
            key: key.into(),
            timeout,
            current: Mutex::new(Session::new()),
        };
        store.load();
        store
    }

    /// Reads the persisted session, replacing it when absent, corrupt or expired.
    pub fn load(&self) -> Session {
        let now = now_ms();
        let session = match self.read() {
            Ok(Some(stored)) if !stored.is_expired(self.timeout, now) => {
                debug!(sender_id = %stored.sender_id, "resuming stored chat session");
                stored
            }
            Ok(Some(stored)) => {
                info!(
                    expired_sender_id = %stored.sender_id,
                    timeout_secs = self.timeout.as_secs(),
                    "stored chat session expired, starting a new one"
                );
                self.create()
            }
            Ok(None) => self.create(),
            Err(err) => {
                debug!(error = %err, key = %self.key, "stored chat session unreadable, treating as absent");
                self.create()
            }
        };
        *self.lock() = session.clone();
        session
    }

    /// Bumps the session timestamp and persists it.
    pub fn touch(&self) -> Session {
        let session = {
            let mut current = self.lock();
            current.touched_at_ms = now_ms();
            current.clone()
        };
        self.persist(&session);
        session
    }

    pub fn current(&self) -> Session {
        self.lock().clone()
    }

    pub fn sender_id(&self) -> String {
        self.lock().sender_id.clone()
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn create(&self) -> Session {
        let session = Session::new();
        info!(sender_id = %session.sender_id, "created chat session");
        self.persist(&session);
        session
    }

    fn read(&self) -> Result<Option<Session>, StorageError> {
        match self.storage.get(&self.key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn persist(&self, session: &Session) {
        let result = serde_json::to_string(session)
            .map_err(StorageError::from)
            .and_then(|raw| self.storage.set(&self.key, &raw));
        if let Err(err) = result {
            warn!(error = %err, key = %self.key, "failed to persist chat session");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Session> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

use std::{
    collections::HashMap,
    error::Error,
    fmt::Display,
    sync::{Arc, Mutex},
};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use nectar_core::{
    err::broker::{BrokerError, ErrorKind},
    qos::QosLevel,
};

/// One row per known client, keyed by client id.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub client_id: String,
    pub username: Option<String>,
    pub last_connect: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(client_id: String, username: Option<String>) -> Self {
        let now = Utc::now();
        return Self {
            client_id,
            username,
            last_connect: now,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
    }
}

/// The message published on behalf of a client that vanished without a
/// DISCONNECT, keyed by client id.
#[derive(Debug, Clone, PartialEq)]
pub struct Will {
    pub client_id: String,
    pub topic: String,
    pub qos: QosLevel,
    pub payload: Bytes,
    pub retain: bool,
}

/// The most recent retained PUBLISH on a topic, keyed by topic.
#[derive(Debug, Clone, PartialEq)]
pub struct RetainedMessage {
    pub topic: String,
    pub qos: QosLevel,
    pub payload: Bytes,
}

#[derive(Debug)]
pub struct StoreError {
    message: String,
}

impl StoreError {
    pub fn new(message: String) -> Self {
        return Self { message };
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        return write!(f, "{}", self.message);
    }
}

impl Error for StoreError {}

impl From<StoreError> for BrokerError {
    fn from(value: StoreError) -> Self {
        return BrokerError::new(ErrorKind::StoreError, value.message);
    }
}

pub trait SessionStore: Send + Sync {
    /// Creates or refreshes the row for the session's client id.
    fn create(&self, session: Session) -> Result<(), StoreError>;
}

pub trait WillStore: Send + Sync {
    fn create(&self, will: Will) -> Result<(), StoreError>;

    /// Removes and returns the stored will for the client, if any. Used both
    /// to publish it on an ungraceful close and to discard it on DISCONNECT.
    fn take(&self, client_id: &str) -> Result<Option<Will>, StoreError>;
}

pub trait RetainedStore: Send + Sync {
    fn upsert(&self, message: RetainedMessage) -> Result<(), StoreError>;

    fn remove(&self, topic: &str) -> Result<(), StoreError>;

    fn get(&self, topic: &str) -> Result<Option<RetainedMessage>, StoreError>;
}

/// The persistence collaborators handed to the broker. Database-backed
/// implementations plug in here; the in-memory set below is the default.
#[derive(Clone)]
pub struct Stores {
    pub sessions: Arc<dyn SessionStore>,
    pub wills: Arc<dyn WillStore>,
    pub retained: Arc<dyn RetainedStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        return Self {
            sessions: Arc::new(MemorySessionStore::new()),
            wills: Arc::new(MemoryWillStore::new()),
            retained: Arc::new(MemoryRetainedStore::new()),
        };
    }
}

fn poisoned(what: &str) -> StoreError {
    return StoreError::new(format!("The in-memory {what} store lock was poisoned."));
}

pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        return Self {
            sessions: Mutex::new(HashMap::new()),
        };
    }
}

impl SessionStore for MemorySessionStore {
    fn create(&self, mut session: Session) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock().map_err(|_| poisoned("session"))?;

        if let Some(existing) = sessions.get(&session.client_id) {
            session.created_at = existing.created_at;
            session.updated_at = Utc::now();
        }

        sessions.insert(session.client_id.clone(), session);
        return Ok(());
    }
}

pub struct MemoryWillStore {
    wills: Mutex<HashMap<String, Will>>,
}

impl MemoryWillStore {
    pub fn new() -> Self {
        return Self {
            wills: Mutex::new(HashMap::new()),
        };
    }
}

impl WillStore for MemoryWillStore {
    fn create(&self, will: Will) -> Result<(), StoreError> {
        let mut wills = self.wills.lock().map_err(|_| poisoned("will"))?;
        wills.insert(will.client_id.clone(), will);
        return Ok(());
    }

    fn take(&self, client_id: &str) -> Result<Option<Will>, StoreError> {
        let mut wills = self.wills.lock().map_err(|_| poisoned("will"))?;
        return Ok(wills.remove(client_id));
    }
}

pub struct MemoryRetainedStore {
    messages: Mutex<HashMap<String, RetainedMessage>>,
}

impl MemoryRetainedStore {
    pub fn new() -> Self {
        return Self {
            messages: Mutex::new(HashMap::new()),
        };
    }
}

impl RetainedStore for MemoryRetainedStore {
    fn upsert(&self, message: RetainedMessage) -> Result<(), StoreError> {
        let mut messages = self.messages.lock().map_err(|_| poisoned("retained"))?;
        messages.insert(message.topic.clone(), message);
        return Ok(());
    }

    fn remove(&self, topic: &str) -> Result<(), StoreError> {
        let mut messages = self.messages.lock().map_err(|_| poisoned("retained"))?;
        messages.remove(topic);
        return Ok(());
    }

    fn get(&self, topic: &str) -> Result<Option<RetainedMessage>, StoreError> {
        let messages = self.messages.lock().map_err(|_| poisoned("retained"))?;
        return Ok(messages.get(topic).cloned());
    }
}

#[cfg(test)]
mod in_memory {
    use bytes::Bytes;
    use nectar_core::qos::QosLevel;

    use super::{
        MemoryRetainedStore, MemorySessionStore, MemoryWillStore, RetainedMessage, RetainedStore,
        Session, SessionStore, Will, WillStore,
    };

    #[test]
    fn session_create_is_an_upsert() {
        let store = MemorySessionStore::new();

        store
            .create(Session::new("dev-1".to_string(), None))
            .unwrap();
        store
            .create(Session::new("dev-1".to_string(), Some("root".to_string())))
            .unwrap();

        let sessions = store.sessions.lock().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions["dev-1"].username.as_deref(), Some("root"));
    }

    #[test]
    fn will_take_removes_the_record() {
        let store = MemoryWillStore::new();

        store
            .create(Will {
                client_id: "dev-1".to_string(),
                topic: "status".to_string(),
                qos: QosLevel::AtMostOnce,
                payload: Bytes::from_static(b"gone"),
                retain: false,
            })
            .unwrap();

        let will = store.take("dev-1").unwrap().expect("will should be stored");
        assert_eq!(will.topic, "status");
        assert!(store.take("dev-1").unwrap().is_none());
    }

    #[test]
    fn retained_upsert_replaces_and_remove_clears() {
        let store = MemoryRetainedStore::new();

        store
            .upsert(RetainedMessage {
                topic: "t".to_string(),
                qos: QosLevel::AtMostOnce,
                payload: Bytes::from_static(b"one"),
            })
            .unwrap();
        store
            .upsert(RetainedMessage {
                topic: "t".to_string(),
                qos: QosLevel::AtLeastOnce,
                payload: Bytes::from_static(b"two"),
            })
            .unwrap();

        let message = store.get("t").unwrap().expect("message should be retained");
        assert_eq!(message.payload, Bytes::from_static(b"two"));

        store.remove("t").unwrap();
        assert!(store.get("t").unwrap().is_none());
    }
}

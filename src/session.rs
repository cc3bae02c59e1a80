use ahash::AHashMap;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::debug;

/// One logical peer: auth/routing key, visible group, user identity and
/// free-form metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub key: String,
    pub group: String,
    pub user: String,
    pub meta: HashMap<String, String>,
    pub last: Instant,
}

impl Session {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            group: String::new(),
            user: String::new(),
            meta: HashMap::new(),
            last: Instant::now(),
        }
    }

    pub fn with_group(mut self, group: &str) -> Self {
        self.group = group.to_string();
        self
    }

    pub fn with_user(mut self, user: &str) -> Self {
        self.user = user.to_string();
        self
    }

    pub fn with_meta(mut self, key: &str, value: &str) -> Self {
        self.meta.insert(key.to_string(), value.to_string());
        self
    }

    pub fn touch(&mut self) {
        self.last = Instant::now();
    }

    pub fn idle(&self) -> Duration {
        self.last.elapsed()
    }

    pub fn is_expired(&self, max_idle: Duration) -> bool {
        self.idle() > max_idle
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new("")
    }
}

/// Sessions seen by a server, keyed by session key.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: RwLock<AHashMap<String, Session>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records activity for `session`, inserting it on first contact. The
    /// stored copy takes the incoming group/user/meta.
    pub fn keep(&self, session: &Session) -> Session {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let mut kept = session.clone();
        kept.touch();
        if sessions.insert(kept.key.clone(), kept.clone()).is_none() {
            debug!("session {} of {}/{} is created", kept.key, kept.group, kept.user);
        }
        kept
    }

    pub fn get(&self, key: &str) -> Option<Session> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn remove(&self, key: &str) -> Option<Session> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner).remove(key)
    }

    /// Removes and returns every session idle for longer than `max_idle`.
    pub fn expired(&self, max_idle: Duration) -> Vec<Session> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let keys: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.is_expired(max_idle))
            .map(|(k, _)| k.clone())
            .collect();
        keys.iter().filter_map(|k| sessions.remove(k)).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

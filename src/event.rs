use crate::connection::{Connection, ConnectionSet, ConnectionState};
use crate::protocol::SyncData;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// Subscribes to all groups.
pub const ALL_GROUPS: &str = "*";

pub trait NetworkEvent: Send + Sync {
    fn on_state(&self, _all: &ConnectionSet, _conn: &Arc<dyn Connection>, _state: ConnectionState, _info: Option<&str>) {}

    fn on_ping(&self, _conn: &Arc<dyn Connection>, _speed: Duration) {}

    fn on_data_synced(&self, _conn: &Arc<dyn Connection>, _data: &SyncData) {}
}

#[derive(Default)]
pub struct EventHub {
    listeners: RwLock<Vec<(String, Arc<dyn NetworkEvent>)>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `listener` to `group` (or [`ALL_GROUPS`]). Registering the
    /// same listener again moves it to the new group.
    pub fn register(&self, group: &str, listener: Arc<dyn NetworkEvent>) {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        listeners.retain(|(_, l)| !Arc::ptr_eq(l, &listener));
        listeners.push((group.to_string(), listener));
    }

    pub fn unregister(&self, listener: &Arc<dyn NetworkEvent>) {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        listeners.retain(|(_, l)| !Arc::ptr_eq(l, listener));
    }

    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Listeners are copied out so they can re-register from inside a callback.
    fn matching(&self, group: &str) -> Vec<Arc<dyn NetworkEvent>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(g, _)| g == group || g == ALL_GROUPS)
            .map(|(_, l)| Arc::clone(l))
            .collect()
    }

    pub fn dispatch_state(&self, all: &ConnectionSet, conn: &Arc<dyn Connection>, state: ConnectionState, info: Option<&str>) {
        for listener in self.matching(&conn.session().group) {
            listener.on_state(all, conn, state, info);
        }
    }

    pub fn dispatch_ping(&self, conn: &Arc<dyn Connection>, speed: Duration) {
        for listener in self.matching(&conn.session().group) {
            listener.on_ping(conn, speed);
        }
    }

    pub fn dispatch_data_synced(&self, conn: &Arc<dyn Connection>, data: &SyncData) {
        for listener in self.matching(&conn.session().group) {
            listener.on_data_synced(conn, data);
        }
    }
}

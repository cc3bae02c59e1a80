use crate::connection::{connection_set, Connection, ConnectionSet, ConnectionState};
use crate::debug::{log_sync_data, trace_sync_summary};
use crate::error::{LinkError, Result};
use crate::protocol::{CallArg, CallResult, SyncData};
use crate::serialization::{BinaryFormat, BinarySerializer};
use crate::session::Session;
use ahash::AHashMap;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

pub trait Transport: Send + Sync {
    fn start(&self) -> Result<()>;
    fn stop(&self) -> Result<()>;
    fn is_ready(&self) -> bool;
    fn ready(&self) -> Result<()>;
    fn pause(&self) -> Result<()>;

    /// Pushes `data` to every connection of `data.group` except `excluded`.
    fn push_delta(&self, data: &SyncData, excluded: &[Arc<dyn Connection>]) -> Result<()>;

    fn call(&self, arg: &CallArg) -> Result<CallResult>;

    fn ping(&self) -> Result<(Arc<dyn Connection>, Duration)>;

    fn reconnect(&self) -> Result<()>;

    /// Closes every connection bound to session `key`.
    fn close_session(&self, key: &str) -> Result<()>;
}

pub trait NetworkCallback: Send + Sync {
    fn on_connection_state(&self, all: &ConnectionSet, conn: &Arc<dyn Connection>, state: ConnectionState, info: Option<&str>);
    fn on_call_received(&self, conn: &Arc<dyn Connection>, arg: &CallArg) -> CallResult;
    fn on_delta_received(&self, conn: &Arc<dyn Connection>, data: &SyncData) -> Result<()>;
    /// Round trip of a ping sent by this side.
    fn on_ping(&self, conn: &Arc<dyn Connection>, speed: Duration);
    /// A ping from the peer arrived on `conn`.
    fn on_ping_received(&self, conn: &Arc<dyn Connection>);
}

/// In-process connection that keeps every pushed delta as encoded bytes.
pub struct MemoryConnection {
    id: String,
    session: Session,
    server: bool,
    client: bool,
    state: Mutex<ConnectionState>,
    serializer: BinarySerializer,
    outbox: Mutex<Vec<Bytes>>,
}

impl MemoryConnection {
    /// A ready, server side connection using JSON encoding.
    pub fn new(id: &str, session: Session) -> Self {
        Self {
            id: id.to_string(),
            session,
            server: true,
            client: false,
            state: Mutex::new(ConnectionState::Ready),
            serializer: BinarySerializer::json(),
            outbox: Mutex::new(Vec::new()),
        }
    }

    pub fn with_format(mut self, format: BinaryFormat) -> Self {
        self.serializer = BinarySerializer::new(format);
        self
    }

    pub fn with_roles(mut self, server: bool, client: bool) -> Self {
        self.server = server;
        self.client = client;
        self
    }

    pub fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub fn outbox_len(&self) -> usize {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Decodes and empties the outbox in push order.
    pub fn drain_outbox(&self) -> Result<Vec<SyncData>> {
        let pending: Vec<Bytes> = std::mem::take(&mut *self.outbox.lock().unwrap_or_else(PoisonError::into_inner));
        pending
            .iter()
            .map(|data| {
                let decoded = self.serializer.deserialize_sync(data)?;
                log_sync_data("recv", &decoded);
                Ok(decoded)
            })
            .collect()
    }
}

impl Connection for MemoryConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn session(&self) -> Session {
        self.session.clone()
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_server(&self) -> bool {
        self.server
    }

    fn is_client(&self) -> bool {
        self.client
    }

    fn push_delta(&self, data: &SyncData) -> Result<()> {
        if matches!(self.state(), ConnectionState::Closing | ConnectionState::Closed) {
            return Err(LinkError::ConnectionClosed);
        }
        let data = data.encode_for(&self.session);
        let encoded = self.serializer.serialize_sync(&data)?;
        log_sync_data("send", &data);
        trace_sync_summary("send", &data, encoded.len());
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner).push(encoded);
        Ok(())
    }
}

type CallRoute = Arc<dyn Fn(&CallArg) -> Result<CallResult> + Send + Sync>;

/// Loopback transport. Calls are encoded and decoded on both legs.
pub struct MemoryTransport {
    serializer: BinarySerializer,
    connections: RwLock<AHashMap<String, Arc<MemoryConnection>>>,
    next_id: AtomicUsize,
    running: AtomicBool,
    ready: AtomicBool,
    call_route: RwLock<Option<CallRoute>>,
    ping_failure: AtomicBool,
    reconnects: AtomicUsize,
    closed_sessions: Mutex<Vec<String>>,
}

impl MemoryTransport {
    pub fn new(format: BinaryFormat) -> Self {
        Self {
            serializer: BinarySerializer::new(format),
            connections: RwLock::new(AHashMap::new()),
            next_id: AtomicUsize::new(0),
            running: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            call_route: RwLock::new(None),
            ping_failure: AtomicBool::new(false),
            reconnects: AtomicUsize::new(0),
            closed_sessions: Mutex::new(Vec::new()),
        }
    }

    /// Opens a server side connection for `session`.
    pub fn connect(&self, session: Session) -> Arc<MemoryConnection> {
        let id = format!("mem-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let conn = Arc::new(MemoryConnection::new(&id, session).with_format(self.serializer.format()));
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::clone(&conn));
        conn
    }

    pub fn connection(&self, id: &str) -> Option<Arc<MemoryConnection>> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn connection_set(&self) -> ConnectionSet {
        let conns: Vec<Arc<dyn Connection>> = self
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|c| Arc::clone(c) as Arc<dyn Connection>)
            .collect();
        connection_set(&conns)
    }

    pub fn route_calls<F>(&self, route: F)
    where
        F: Fn(&CallArg) -> Result<CallResult> + Send + Sync + 'static,
    {
        *self.call_route.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(route));
    }

    pub fn set_ping_failure(&self, failing: bool) {
        self.ping_failure.store(failing, Ordering::Release);
    }

    pub fn reconnect_count(&self) -> usize {
        self.reconnects.load(Ordering::Acquire)
    }

    pub fn closed_sessions(&self) -> Vec<String> {
        self.closed_sessions.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn group_connections(&self, group: &str) -> Vec<Arc<MemoryConnection>> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|c| c.session.group == group)
            .cloned()
            .collect()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(BinaryFormat::Json)
    }
}

impl Transport for MemoryTransport {
    fn start(&self) -> Result<()> {
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::Release);
        self.ready.store(false, Ordering::Release);
        let conns: Vec<Arc<MemoryConnection>> = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, c)| c)
            .collect();
        for conn in conns {
            conn.set_state(ConnectionState::Closed);
        }
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn ready(&self) -> Result<()> {
        if !self.running.load(Ordering::Acquire) {
            return Err(LinkError::NotStarted);
        }
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        self.ready.store(false, Ordering::Release);
        Ok(())
    }

    fn push_delta(&self, data: &SyncData, excluded: &[Arc<dyn Connection>]) -> Result<()> {
        for conn in self.group_connections(&data.group) {
            if excluded.iter().any(|e| e.id() == conn.id()) {
                continue;
            }
            if let Err(e) = conn.push_delta(data) {
                warn!("push delta {} to {} fail with {}", data.id, conn.id(), e);
            }
        }
        Ok(())
    }

    fn call(&self, arg: &CallArg) -> Result<CallResult> {
        if !self.running.load(Ordering::Acquire) {
            return Err(LinkError::ConnectionClosed);
        }
        let route = self
            .call_route
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| LinkError::Transport("no call route installed".to_string()))?;
        let arg = self.serializer.deserialize_call(&self.serializer.serialize_call(arg)?)?;
        let result = route(&arg)?;
        self.serializer.deserialize_result(&self.serializer.serialize_result(&result)?)
    }

    fn ping(&self) -> Result<(Arc<dyn Connection>, Duration)> {
        if self.ping_failure.load(Ordering::Acquire) {
            return Err(LinkError::Timeout);
        }
        let conn = self
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .next()
            .cloned()
            .ok_or(LinkError::ConnectionClosed)?;
        Ok((conn, Duration::from_millis(1)))
    }

    fn reconnect(&self) -> Result<()> {
        let attempt = self.reconnects.fetch_add(1, Ordering::AcqRel) + 1;
        debug!("memory transport reconnect attempt {}", attempt);
        Ok(())
    }

    fn close_session(&self, key: &str) -> Result<()> {
        let closed: Vec<Arc<MemoryConnection>> = {
            let mut conns = self.connections.write().unwrap_or_else(PoisonError::into_inner);
            let ids: Vec<String> = conns
                .iter()
                .filter(|(_, c)| c.session.key == key)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| conns.remove(id)).collect()
        };
        for conn in closed {
            conn.set_state(ConnectionState::Closed);
        }
        self.closed_sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(key.to_string());
        Ok(())
    }
}

use crate::connection::{Connection, ConnectionSet, ConnectionState};
use crate::context::NetworkContext;
use crate::debug::{is_trace_enabled, log_sync_data};
use crate::error::{LinkError, Result};
use crate::protocol::{CallArg, CallResult, SyncData};
use crate::session::{Session, SessionTable};
use crate::throttle::SyncThrottle;
use crate::transport::{NetworkCallback, Transport};
use crossbeam::channel::{self, Sender};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Minimum spacing between two broadcast deltas.
    pub min_sync: Duration,
    /// Keepalive tick. Zero disables the keepalive task.
    pub keepalive: Duration,
    /// Call and dial timeout handed to transports.
    pub timeout: Duration,
    pub is_server: bool,
    pub is_client: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            min_sync: Duration::from_millis(30),
            keepalive: Duration::from_secs(3),
            timeout: Duration::from_secs(5),
            is_server: false,
            is_client: false,
        }
    }
}

impl NetworkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_sync(mut self, interval: Duration) -> Self {
        self.min_sync = interval;
        self
    }

    pub fn with_keepalive(mut self, interval: Duration) -> Self {
        self.keepalive = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_server(mut self, enabled: bool) -> Self {
        self.is_server = enabled;
        self
    }

    pub fn with_client(mut self, enabled: bool) -> Self {
        self.is_client = enabled;
        self
    }

    /// Idle time after which a server drops a session.
    pub fn session_timeout(&self) -> Duration {
        self.keepalive * 2
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    pub sync_count: u64,
    pub whole_count: u64,
    pub recv_count: u64,
    pub recv_errors: u64,
    pub reconnect_attempts: u64,
    pub last_sync: Option<Instant>,
}

struct KeepaliveTask {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

pub struct NetworkManager {
    config: NetworkConfig,
    context: NetworkContext,
    transport: Arc<dyn Transport>,
    session: Session,
    sessions: SessionTable,
    started: AtomicBool,
    ready: AtomicBool,
    throttle: Mutex<SyncThrottle>,
    ping_speed: Mutex<Option<Duration>>,
    stats: Mutex<SyncStats>,
    keepalive: Mutex<Option<KeepaliveTask>>,
}

impl NetworkManager {
    pub fn new(config: NetworkConfig, context: NetworkContext, transport: Arc<dyn Transport>, session: Session) -> Arc<Self> {
        Arc::new(Self {
            throttle: Mutex::new(SyncThrottle::new(config.min_sync)),
            config,
            context,
            transport,
            session,
            sessions: SessionTable::new(),
            started: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            ping_speed: Mutex::new(None),
            stats: Mutex::new(SyncStats::default()),
            keepalive: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn context(&self) -> &NetworkContext {
        &self.context
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn ping_speed(&self) -> Option<Duration> {
        *self.ping_speed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stats(&self) -> SyncStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn update_stats(&self, f: impl FnOnce(&mut SyncStats)) {
        f(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }

    //------ lifecycle -------//

    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.started.load(Ordering::Acquire) {
            return Ok(());
        }
        self.transport.start()?;
        self.started.store(true, Ordering::Release);
        if !self.config.keepalive.is_zero() {
            self.spawn_keepalive()?;
        }
        Ok(())
    }

    /// Also drops every component and factory of the hub.
    pub fn stop(&self) -> Result<()> {
        self.stop_keepalive();
        let stopped = self.transport.stop();
        self.started.store(false, Ordering::Release);
        self.ready.store(false, Ordering::Release);
        self.context.hub.clear("");
        stopped
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire) && self.transport.is_ready()
    }

    pub fn ready(&self) -> Result<()> {
        if !self.is_started() {
            return Err(LinkError::NotStarted);
        }
        if self.ready.load(Ordering::Acquire) {
            return Err(LinkError::AlreadyReady);
        }
        if !self.session.group.is_empty() {
            self.context.hub.clear(&self.session.group);
        }
        self.transport.ready()?;
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        if !self.ready.load(Ordering::Acquire) {
            return Err(LinkError::NotReady);
        }
        self.transport.pause()?;
        self.ready.store(false, Ordering::Release);
        Ok(())
    }

    //------ sync -------//

    /// With `whole_to` throttling is bypassed and `whole_to` alone gets a
    /// whole snapshot instead of the delta.
    pub fn sync(&self, group: &str, whole_to: Option<&Arc<dyn Connection>>) -> bool {
        let throttled = !self
            .throttle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .should_sync(whole_to.is_some());
        if throttled || !self.config.is_server {
            return false;
        }

        let hub = &self.context.hub;
        let mut updated = false;
        let delta = SyncData::new(group, false, hub.sync_send(group, false));
        if delta.is_updated() {
            let excluded: Vec<Arc<dyn Connection>> = whole_to.into_iter().cloned().collect();
            if let Err(e) = self.transport.push_delta(&delta, &excluded) {
                warn!("push delta {} of {} fail with {}", delta.id, group, e);
            }
            self.throttle.lock().unwrap_or_else(PoisonError::into_inner).record();
            self.update_stats(|s| {
                s.sync_count += 1;
                s.last_sync = Some(Instant::now());
            });
            updated = true;
        }
        if let Some(conn) = whole_to {
            let whole = SyncData::new(group, true, hub.sync_send(group, true));
            debug!("whole sync {} of {} with {} components to {}", whole.id, group, whole.components.len(), conn.id());
            if let Err(e) = conn.push_delta(&whole) {
                warn!("push whole {} to {} fail with {}", whole.id, conn.id(), e);
            }
            self.update_stats(|s| s.whole_count += 1);
        }
        updated
    }

    pub fn call<A, R>(&self, cid: &str, name: &str, arg: &A) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let arg = CallArg::new(cid, name, arg)?;
        trace!("call {}.{} by {}", cid, name, arg.id);
        let result = self.transport.call(&arg)?.into_result()?;
        serde_json::from_str(&result).map_err(|e| LinkError::Decode(format!("call {}.{} result {}", cid, name, e)))
    }

    //------ keepalive -------//

    pub fn keep_session(&self, session: &Session) -> Session {
        self.sessions.keep(session)
    }

    /// Closes every session idle for longer than twice the keepalive interval.
    pub fn sweep_sessions(&self) -> Vec<Session> {
        let expired = self.sessions.expired(self.config.session_timeout());
        for session in &expired {
            info!("session {} of {} is timeout, idle {:?}", session.key, session.group, session.idle());
            if let Err(e) = self.transport.close_session(&session.key) {
                warn!("close session {} fail with {}", session.key, e);
            }
        }
        expired
    }

    pub fn keepalive_tick(&self) {
        if !self.is_started() {
            return;
        }
        if self.config.is_server {
            self.sweep_sessions();
        }
        if self.config.is_client {
            match self.transport.ping() {
                Ok((conn, speed)) => self.on_ping(&conn, speed),
                Err(e) => {
                    warn!("ping to server error {}", e);
                    self.update_stats(|s| s.reconnect_attempts += 1);
                    if let Err(e) = self.transport.reconnect() {
                        warn!("reconnect to server fail with {}", e);
                    }
                }
            }
        }
    }

    fn spawn_keepalive(self: &Arc<Self>) -> Result<()> {
        let (stop, stopped) = channel::bounded::<()>(1);
        let ticker = channel::tick(self.config.keepalive);
        let manager: Weak<Self> = Arc::downgrade(self);
        let interval = self.config.keepalive;
        let handle = thread::Builder::new()
            .name("link-keepalive".to_string())
            .spawn(move || {
                info!("keepalive task is starting by {:?}", interval);
                loop {
                    crossbeam::select! {
                        recv(stopped) -> _ => break,
                        recv(ticker) -> _ => {
                            let Some(manager) = manager.upgrade() else { break };
                            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| manager.keepalive_tick())) {
                                error!("keepalive tick panic with {:?}\n{:?}", payload, backtrace::Backtrace::new());
                            }
                        }
                    }
                }
                info!("keepalive task is stopped");
            })
            .map_err(|e| LinkError::Transport(format!("spawn keepalive: {}", e)))?;
        *self.keepalive.lock().unwrap_or_else(PoisonError::into_inner) = Some(KeepaliveTask { stop, handle });
        Ok(())
    }

    fn stop_keepalive(&self) {
        let task = self.keepalive.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(task) = task else {
            return;
        };
        let _ = task.stop.try_send(());
        if task.handle.thread().id() != thread::current().id() && task.handle.join().is_err() {
            warn!("keepalive task exited with panic");
        }
    }
}

impl NetworkCallback for NetworkManager {
    fn on_connection_state(&self, all: &ConnectionSet, conn: &Arc<dyn Connection>, state: ConnectionState, info: Option<&str>) {
        let session = conn.session();
        debug!("connection {} of {} is {:?}", conn.id(), session.group, state);
        if conn.is_server() {
            match state {
                ConnectionState::Connecting | ConnectionState::Ready => {
                    self.keep_session(&session);
                }
                ConnectionState::Closed => {
                    self.sessions.remove(&session.key);
                }
                _ => {}
            }
        }
        if self.config.is_server && conn.is_server() && state == ConnectionState::Ready {
            self.sync(&session.group, Some(conn));
        }
        self.context.events.dispatch_state(all, conn, state, info);
    }

    fn on_call_received(&self, conn: &Arc<dyn Connection>, arg: &CallArg) -> CallResult {
        let session = self.keep_session(&conn.session());
        let result = self
            .context
            .hub
            .find(&arg.cid)
            .ok_or_else(|| LinkError::NotFound(format!("component {}", arg.cid)))
            .and_then(|component| component.invoke_call(&session, arg));
        match result {
            Ok(result) => result,
            Err(e) => {
                warn!("call {}.{} from {} fail with {}", arg.cid, arg.name, session.key, e);
                CallResult::failed(arg, &e)
            }
        }
    }

    fn on_delta_received(&self, conn: &Arc<dyn Connection>, data: &SyncData) -> Result<()> {
        self.keep_session(&conn.session());
        log_sync_data("recv", data);
        if is_trace_enabled() {
            trace!("recv {} of {} with {} components", data.id, data.group, data.components.len());
        }
        let applied = self.context.hub.sync_recv(&data.group, &data.components, data.whole);
        self.update_stats(|s| {
            s.recv_count += 1;
            if applied.is_err() {
                s.recv_errors += 1;
            }
        });
        match applied {
            Ok(()) => {
                self.context.events.dispatch_data_synced(conn, data);
                Ok(())
            }
            Err(e) => {
                warn!("apply sync {} of {} from {} fail with {}", data.id, data.group, conn.id(), e);
                Err(e)
            }
        }
    }

    fn on_ping(&self, conn: &Arc<dyn Connection>, speed: Duration) {
        *self.ping_speed.lock().unwrap_or_else(PoisonError::into_inner) = Some(speed);
        self.context.events.dispatch_ping(conn, speed);
    }

    fn on_ping_received(&self, conn: &Arc<dyn Connection>) {
        if conn.is_server() {
            self.keep_session(&conn.session());
        }
    }
}

impl Drop for NetworkManager {
    fn drop(&mut self) {
        self.stop_keepalive();
    }
}

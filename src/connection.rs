use crate::error::Result;
use crate::protocol::SyncData;
use crate::session::Session;
use ahash::AHashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ConnectionState {
    Connecting = 100,
    Ready = 200,
    Closing = 300,
    Closed = 400,
    Error = 500,
}

/// A transport-level channel bound to one session.
pub trait Connection: Send + Sync {
    fn id(&self) -> &str;
    fn session(&self) -> Session;
    fn state(&self) -> ConnectionState;
    fn is_server(&self) -> bool;
    fn is_client(&self) -> bool;
    fn push_delta(&self, data: &SyncData) -> Result<()>;
}

pub type ConnectionSet = AHashMap<String, Arc<dyn Connection>>;

pub fn connection_set<'a>(conns: impl IntoIterator<Item = &'a Arc<dyn Connection>>) -> ConnectionSet {
    conns
        .into_iter()
        .map(|c| (c.id().to_string(), Arc::clone(c)))
        .collect()
}

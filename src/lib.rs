pub mod access;
pub mod call;
pub mod component;
pub mod connection;
pub mod context;
pub mod debug;
pub mod error;
pub mod event;
pub mod game_loop;
pub mod hub;
pub mod manager;
pub mod protocol;
pub mod sequenced;
pub mod serialization;
pub mod session;
pub mod sync_map;
pub mod throttle;
pub mod transport;
pub mod trigger;

pub use protocol::{
    CallArg, CallResult, ComponentId, Props, SyncComponent, SyncData, Triggers,
};

pub use serialization::{
    BinaryFormat, BinarySerializer,
};

pub use error::{
    LinkError, Result,
};

pub use sync_map::SyncMap;

pub use trigger::{
    TriggerHandler, TriggerQueue, TRIGGER_CAPACITY,
};

pub use call::CallHandler;

pub use access::{access, Access, AccessRules};

pub use component::{
    Creator, NetworkComponent, ANY_PROPERTY,
};

pub use sequenced::{
    read_sequenced, SequencedValue,
};

pub use hub::{
    ComponentHub, Factory, WILDCARD,
};

pub use event::{
    EventHub, NetworkEvent, ALL_GROUPS,
};

pub use session::{
    Session, SessionTable,
};

pub use connection::{
    Connection, ConnectionSet, ConnectionState,
};

pub use transport::{
    MemoryConnection, MemoryTransport, NetworkCallback, Transport,
};

pub use throttle::SyncThrottle;

pub use manager::{
    NetworkConfig, NetworkManager, SyncStats,
};

pub use context::NetworkContext;

pub use game_loop::{GameLoop, DEFAULT_FPS};

pub use debug::{
    format_bytes, init_debug_mode, is_debug_enabled, is_trace_enabled,
    log_sync_data, sync_summary, trace_sync_summary,
};

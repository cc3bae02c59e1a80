use crate::access::Access;
use crate::error::{LinkError, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

/// Pending values kept per trigger between two sync passes.
pub const TRIGGER_CAPACITY: usize = 8;

type ErasedTrigger = Arc<dyn Fn(&str, Value) -> Result<()> + Send + Sync>;

/// A trigger callback with its payload type erased behind JSON decoding.
#[derive(Clone)]
pub struct TriggerHandler {
    call: ErasedTrigger,
}

impl TriggerHandler {
    /// Handler receiving only the fired value.
    pub fn new<T, F>(handler: F) -> Self
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        Self {
            call: Arc::new(move |_name: &str, value: Value| {
                let value: T = serde_json::from_value(value).map_err(|e| LinkError::Decode(e.to_string()))?;
                handler(value);
                Ok(())
            }),
        }
    }

    /// Handler receiving the trigger name and the fired value.
    pub fn named<T, F>(handler: F) -> Self
    where
        T: DeserializeOwned,
        F: Fn(&str, T) + Send + Sync + 'static,
    {
        Self {
            call: Arc::new(move |name: &str, value: Value| {
                let value: T = serde_json::from_value(value).map_err(|e| LinkError::Decode(e.to_string()))?;
                handler(name, value);
                Ok(())
            }),
        }
    }

    pub fn invoke(&self, name: &str, value: Value) -> Result<()> {
        (self.call)(name, value)
    }
}

impl fmt::Debug for TriggerHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TriggerHandler")
    }
}

/// Bounded queue of fired values for one trigger name.
///
/// Firing never blocks: once [`TRIGGER_CAPACITY`] values are pending, new
/// values are dropped until the next drain.
pub struct TriggerQueue {
    name: String,
    handler: TriggerHandler,
    pending: Mutex<VecDeque<(Value, Option<Access>)>>,
    capacity: usize,
}

impl TriggerQueue {
    pub fn new(name: &str, handler: TriggerHandler) -> Self {
        Self::with_capacity(name, handler, TRIGGER_CAPACITY)
    }

    pub fn with_capacity(name: &str, handler: TriggerHandler, capacity: usize) -> Self {
        Self {
            name: name.to_string(),
            handler,
            pending: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queues `value`, returning false when it was dropped on overflow.
    pub fn fire(&self, value: Value) -> bool {
        self.fire_restricted(value, None)
    }

    /// Like [`fire`](Self::fire), sending the value only to sessions `access`
    /// admits.
    pub fn fire_restricted(&self, value: Value, access: Option<Access>) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.len() >= self.capacity {
            return false;
        }
        pending.push_back((value, access));
        true
    }

    /// Empties the queue in FIFO order, running the local handler for each
    /// value, and returns the drained values for transmission.
    pub fn drain_and_invoke_local(&self) -> Vec<Value> {
        self.drain_with_access().into_iter().map(|(value, _)| value).collect()
    }

    pub(crate) fn drain_with_access(&self) -> Vec<(Value, Option<Access>)> {
        let drained: Vec<(Value, Option<Access>)> = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            pending.drain(..).collect()
        };
        for (value, _) in &drained {
            if let Err(e) = self.handler.invoke(&self.name, value.clone()) {
                warn!("trigger {} local invoke error {} by {}", self.name, e, value);
            }
        }
        drained
    }

    /// Replays received values through the handler. A value that fails to
    /// decode is logged and skipped. Returns how many values were applied.
    pub fn receive(&self, values: &[Value]) -> usize {
        let mut applied = 0;
        for value in values {
            match self.handler.invoke(&self.name, value.clone()) {
                Ok(()) => applied += 1,
                Err(e) => warn!("trigger {} recv error {} by {}", self.name, e, value),
            }
        }
        applied
    }
}

impl fmt::Debug for TriggerQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerQueue")
            .field("name", &self.name)
            .field("pending", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

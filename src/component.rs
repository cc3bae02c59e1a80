use crate::access::{Access, AccessRules};
use crate::call::CallHandler;
use crate::error::{LinkError, Result};
use crate::hub::ComponentHub;
use crate::protocol::{CallArg, CallResult, Props, SyncComponent, Triggers};
use crate::session::Session;
use crate::sync_map::SyncMap;
use crate::trigger::{TriggerHandler, TriggerQueue};
use ahash::AHashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tracing::{error, trace, warn};

pub const ANY_PROPERTY: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Creator {
    Local,
    /// Materialized by the hub to mirror a remote entity.
    Remote,
}

type PropObserver = Arc<dyn Fn(&str, &Value) + Send + Sync>;
type ComponentHook = Arc<dyn Fn(&NetworkComponent) + Send + Sync>;

#[derive(Default)]
struct ComponentState {
    props: SyncMap,
    triggers: AHashMap<String, Arc<TriggerQueue>>,
    calls: AHashMap<String, CallHandler>,
    observers: AHashMap<String, PropObserver>,
    access: AHashMap<String, Access>,
}

impl ComponentState {
    fn is_hollow(&self) -> bool {
        self.props.is_empty() && self.triggers.is_empty() && self.calls.is_empty()
    }
}

pub struct NetworkComponent {
    factory: String,
    group: String,
    owner: String,
    cid: String,
    hub: Weak<ComponentHub>,
    remote: AtomicBool,
    removed: AtomicBool,
    resyncing: AtomicBool,
    indexed: AtomicBool,
    state: RwLock<ComponentState>,
    on_remove: RwLock<Option<ComponentHook>>,
    on_synced: RwLock<Option<ComponentHook>>,
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl NetworkComponent {
    pub fn new(hub: &Arc<ComponentHub>, factory: &str, group: &str, owner: &str, cid: &str) -> Arc<Self> {
        Arc::new(Self {
            factory: factory.to_string(),
            group: group.to_string(),
            owner: owner.to_string(),
            cid: cid.to_string(),
            hub: Arc::downgrade(hub),
            remote: AtomicBool::new(false),
            removed: AtomicBool::new(false),
            resyncing: AtomicBool::new(false),
            indexed: AtomicBool::new(false),
            state: RwLock::new(ComponentState::default()),
            on_remove: RwLock::new(None),
            on_synced: RwLock::new(None),
        })
    }

    pub fn factory(&self) -> &str {
        &self.factory
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn cid(&self) -> &str {
        &self.cid
    }

    pub fn is_owned_by(&self, user: &str) -> bool {
        self.owner == user
    }

    pub fn creator(&self) -> Creator {
        if self.remote.load(Ordering::Acquire) {
            Creator::Remote
        } else {
            Creator::Local
        }
    }

    pub(crate) fn set_creator(&self, creator: Creator) {
        self.remote.store(creator == Creator::Remote, Ordering::Release);
    }

    /// Stays indexed until the next sync pass emits its tombstone.
    pub fn remove(&self) {
        self.removed.store(true, Ordering::Release);
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    pub fn is_resyncing(&self) -> bool {
        self.resyncing.load(Ordering::Acquire)
    }

    pub(crate) fn set_resyncing(&self, resyncing: bool) {
        self.resyncing.store(resyncing, Ordering::Release);
    }

    pub fn is_indexed(&self) -> bool {
        self.indexed.load(Ordering::Acquire)
    }

    pub(crate) fn set_indexed(&self, indexed: bool) {
        self.indexed.store(indexed, Ordering::Release);
    }

    fn read(&self) -> RwLockReadGuard<'_, ComponentState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ComponentState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn join(self: &Arc<Self>) {
        if self.is_indexed() || self.is_removed() {
            return;
        }
        if let Some(hub) = self.hub.upgrade() {
            hub.add(self);
        }
    }

    fn leave_if_hollow(self: &Arc<Self>, hollow: bool) {
        if !hollow {
            return;
        }
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self);
        }
    }

    //------ properties -------//

    pub fn register_props(self: &Arc<Self>) {
        self.join();
    }

    pub fn unregister_props(self: &Arc<Self>) {
        let hollow = {
            let mut state = self.write();
            state.props.clear();
            state.is_hollow()
        };
        self.leave_if_hollow(hollow);
    }

    pub fn set_property<T: Serialize>(self: &Arc<Self>, path: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value).map_err(|e| LinkError::Encode(e.to_string()))?;
        let observers = {
            let mut state = self.write();
            state.props.set(path, value.clone())?;
            [path, ANY_PROPERTY]
                .iter()
                .filter_map(|k| state.observers.get(*k).cloned())
                .collect::<Vec<_>>()
        };
        self.join();
        for observer in observers {
            observer(path, &value);
        }
        Ok(())
    }

    pub fn get_property(&self, path: &str) -> Result<Value> {
        self.read().props.get(path).cloned()
    }

    pub fn get_property_as<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let value = self.get_property(path)?;
        serde_json::from_value(value).map_err(|e| LinkError::Decode(format!("{}.{}: {}", self.cid, path, e)))
    }

    pub fn delete_property(self: &Arc<Self>, path: &str) -> Result<()> {
        let hollow = {
            let mut state = self.write();
            state.props.delete(path)?;
            state.is_hollow()
        };
        self.leave_if_hollow(hollow);
        Ok(())
    }

    pub fn property_count(&self) -> usize {
        self.read().props.len()
    }

    pub fn removed_properties(&self) -> Vec<String> {
        self.read().props.removed_keys()
    }

    /// Received updates only notify the exact-key observer.
    pub fn on_property_update<F>(&self, key: &str, observer: F)
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        self.write().observers.insert(key.to_string(), Arc::new(observer));
    }

    pub fn remove_property_observer(&self, key: &str) {
        self.write().observers.remove(key);
    }

    /// Restricts top-level property `key` to the sessions `access` admits.
    pub fn set_property_access<F>(&self, key: &str, access: F)
    where
        F: Fn(&Session) -> bool + Send + Sync + 'static,
    {
        self.write().access.insert(key.to_string(), Arc::new(access));
    }

    pub fn clear_property_access(&self, key: &str) {
        self.write().access.remove(key);
    }

    pub fn send_props(&self, whole: bool) -> Props {
        self.write().props.drain(whole)
    }

    pub fn recv_props(&self, updated: &Props) {
        let notify: Vec<(String, Value, PropObserver)> = {
            let mut state = self.write();
            state.props.merge(updated);
            updated
                .iter()
                .filter_map(|(k, v)| state.observers.get(k).map(|o| (k.clone(), v.clone(), Arc::clone(o))))
                .collect()
        };
        for (key, value, observer) in notify {
            observer(&key, &value);
        }
    }

    //------ triggers -------//

    pub fn register_trigger(self: &Arc<Self>, name: &str, handler: TriggerHandler) -> Result<()> {
        {
            let mut state = self.write();
            if state.triggers.contains_key(name) {
                return Err(LinkError::AlreadyRegistered(format!("trigger {} on {}", name, self.cid)));
            }
            state
                .triggers
                .insert(name.to_string(), Arc::new(TriggerQueue::new(name, handler)));
        }
        self.join();
        Ok(())
    }

    pub fn unregister_trigger(self: &Arc<Self>, name: &str) {
        let hollow = {
            let mut state = self.write();
            state.triggers.remove(name);
            state.is_hollow()
        };
        self.leave_if_hollow(hollow);
    }

    pub fn clear_triggers(self: &Arc<Self>) {
        let hollow = {
            let mut state = self.write();
            state.triggers.clear();
            state.is_hollow()
        };
        self.leave_if_hollow(hollow);
    }

    fn find_trigger(&self, name: &str) -> Option<Arc<TriggerQueue>> {
        self.read().triggers.get(name).cloned()
    }

    /// Queues `value` on trigger `name`. A full queue silently drops it.
    pub fn fire_trigger<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        self.queue_trigger(name, value, None)
    }

    /// Fires a value only the sessions `access` admits will receive. The
    /// local handler still runs.
    pub fn fire_trigger_to<T, F>(&self, name: &str, value: &T, access: F) -> Result<()>
    where
        T: Serialize,
        F: Fn(&Session) -> bool + Send + Sync + 'static,
    {
        self.queue_trigger(name, value, Some(Arc::new(access)))
    }

    fn queue_trigger<T: Serialize>(&self, name: &str, value: &T, access: Option<Access>) -> Result<()> {
        let trigger = self
            .find_trigger(name)
            .ok_or_else(|| LinkError::NotFound(format!("component {} trigger {}", self.cid, name)))?;
        let value = serde_json::to_value(value).map_err(|e| LinkError::Encode(e.to_string()))?;
        if !trigger.fire_restricted(value, access) {
            trace!("component {} trigger {} is full, value dropped", self.cid, name);
        }
        Ok(())
    }

    pub fn send_triggers(&self) -> Triggers {
        self.drain_triggers(&mut AccessRules::default())
    }

    fn drain_triggers(&self, rules: &mut AccessRules) -> Triggers {
        let triggers: Vec<Arc<TriggerQueue>> = self.read().triggers.values().cloned().collect();
        let mut sent = Triggers::new();
        for trigger in triggers {
            let (values, access): (Vec<Value>, Vec<Option<Access>>) = trigger.drain_with_access().into_iter().unzip();
            if !values.is_empty() {
                rules.restrict_trigger(trigger.name(), access);
                sent.insert(trigger.name().to_string(), values);
            }
        }
        sent
    }

    /// Drains props and triggers into one outbound record carrying the
    /// access rules of what was drained.
    pub fn send_update(&self, whole: bool) -> SyncComponent {
        let mut rules = AccessRules::default();
        let props = self.send_props(whole);
        {
            let state = self.read();
            for key in props.keys() {
                if let Some(access) = state.access.get(key) {
                    rules.restrict_prop(key, Arc::clone(access));
                }
            }
        }
        let triggers = self.drain_triggers(&mut rules);
        let mut record = SyncComponent::update(&self.factory, &self.cid, &self.owner, props, triggers);
        record.access = rules;
        record
    }

    pub fn recv_triggers(&self, updated: &Triggers) {
        for (name, values) in updated {
            match self.find_trigger(name) {
                Some(trigger) => {
                    trigger.receive(values);
                }
                None => warn!("component {} trigger {} is not exists for recv", self.cid, name),
            }
        }
    }

    //------ calls -------//

    pub fn register_call(self: &Arc<Self>, name: &str, handler: CallHandler) -> Result<()> {
        {
            let mut state = self.write();
            if state.calls.contains_key(name) {
                return Err(LinkError::AlreadyRegistered(format!("call {} on {}", name, self.cid)));
            }
            state.calls.insert(name.to_string(), handler);
        }
        self.join();
        Ok(())
    }

    pub fn unregister_call(self: &Arc<Self>, name: &str) {
        let hollow = {
            let mut state = self.write();
            state.calls.remove(name);
            state.is_hollow()
        };
        self.leave_if_hollow(hollow);
    }

    pub fn clear_calls(self: &Arc<Self>) {
        let hollow = {
            let mut state = self.write();
            state.calls.clear();
            state.is_hollow()
        };
        self.leave_if_hollow(hollow);
    }

    /// A panicking handler is reported as [`LinkError::HandlerFault`].
    pub fn invoke_call(&self, session: &Session, arg: &CallArg) -> Result<CallResult> {
        let handler = self
            .read()
            .calls
            .get(&arg.name)
            .cloned()
            .ok_or_else(|| LinkError::NotFound(format!("component {} call {}", self.cid, arg.name)))?;

        match panic::catch_unwind(AssertUnwindSafe(|| handler.invoke(session, &arg.id, &arg.arg))) {
            Ok(Ok(result)) => Ok(CallResult::ok(arg, result)),
            Ok(Err(LinkError::Decode(e))) => Err(LinkError::Decode(format!("call {}.{} {}", arg.cid, arg.name, e))),
            Ok(Err(e)) => Err(e),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(
                    "component {}/{} call {} panic with {}\nArg: {}\nStack:\n{:?}",
                    self.factory,
                    self.cid,
                    arg.name,
                    message,
                    arg.arg,
                    backtrace::Backtrace::new()
                );
                Err(LinkError::HandlerFault(message))
            }
        }
    }

    //------ hooks -------//

    pub fn on_remove<F>(&self, hook: F)
    where
        F: Fn(&NetworkComponent) + Send + Sync + 'static,
    {
        *self.on_remove.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(hook));
    }

    pub fn on_synced<F>(&self, hook: F)
    where
        F: Fn(&NetworkComponent) + Send + Sync + 'static,
    {
        *self.on_synced.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(hook));
    }

    pub fn has_synced_hook(&self) -> bool {
        self.on_synced.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    pub(crate) fn fire_removed(&self) {
        let hook = self.on_remove.read().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(hook) = hook {
            hook(self);
        }
    }

    pub(crate) fn fire_synced(&self) {
        let hook = self.on_synced.read().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(hook) = hook {
            hook(self);
        }
    }
}

impl fmt::Debug for NetworkComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkComponent")
            .field("factory", &self.factory)
            .field("group", &self.group)
            .field("owner", &self.owner)
            .field("cid", &self.cid)
            .field("creator", &self.creator())
            .field("removed", &self.is_removed())
            .finish()
    }
}

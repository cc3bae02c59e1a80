use crate::component::{Creator, NetworkComponent};
use crate::error::{LinkError, Result};
use crate::protocol::SyncComponent;
use ahash::{AHashMap, AHashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::debug;

pub const WILDCARD: &str = "*";

pub type Factory =
    Arc<dyn Fn(&Arc<ComponentHub>, &str, &str, &str, &str) -> Result<Arc<NetworkComponent>> + Send + Sync>;

type HubHook = Arc<dyn Fn(&Arc<NetworkComponent>) + Send + Sync>;

pub fn group_factory_key(group: &str) -> String {
    format!("{}-*", group)
}

#[derive(Default)]
struct ComponentIndex {
    all: AHashMap<String, Arc<NetworkComponent>>,
    groups: AHashMap<String, AHashMap<String, Arc<NetworkComponent>>>,
}

#[derive(Default)]
pub struct ComponentHub {
    components: RwLock<ComponentIndex>,
    factories: RwLock<AHashMap<String, Factory>>,
    on_add: RwLock<Option<HubHook>>,
    on_remove: RwLock<Option<HubHook>>,
    mirroring: Mutex<AHashSet<String>>,
}

impl ComponentHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_on_add<F>(&self, hook: F)
    where
        F: Fn(&Arc<NetworkComponent>) + Send + Sync + 'static,
    {
        *self.on_add.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(hook));
    }

    pub fn set_on_remove<F>(&self, hook: F)
    where
        F: Fn(&Arc<NetworkComponent>) + Send + Sync + 'static,
    {
        *self.on_remove.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(hook));
    }

    /// # Panics
    ///
    /// Panics when a different instance is already indexed under the same CID.
    pub fn add(&self, component: &Arc<NetworkComponent>) -> bool {
        {
            let mut index = self.components.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = index.all.get(component.cid()) {
                if !Arc::ptr_eq(existing, component) {
                    panic!("component {} is registered by another instance", component.cid());
                }
                return false;
            }
            if self.mirroring.lock().unwrap_or_else(PoisonError::into_inner).contains(component.cid()) {
                component.set_creator(Creator::Remote);
            }
            for group in [component.group(), WILDCARD] {
                index
                    .groups
                    .entry(group.to_string())
                    .or_default()
                    .insert(component.cid().to_string(), Arc::clone(component));
            }
            index.all.insert(component.cid().to_string(), Arc::clone(component));
            component.set_indexed(true);
        }
        debug!("component {}/{} is added on {}", component.factory(), component.cid(), component.group());
        let hook = self.on_add.read().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(hook) = hook {
            hook(component);
        }
        true
    }

    pub fn remove(&self, component: &NetworkComponent) -> bool {
        let removed = {
            let mut index = self.components.write().unwrap_or_else(PoisonError::into_inner);
            let removed = index.all.remove(component.cid());
            if let Some(c) = &removed {
                for group in [c.group(), WILDCARD] {
                    if let Some(set) = index.groups.get_mut(group) {
                        set.remove(c.cid());
                    }
                }
                c.set_indexed(false);
            }
            removed
        };
        let Some(removed) = removed else {
            return false;
        };
        debug!("component {}/{} is removed from {}", removed.factory(), removed.cid(), removed.group());
        removed.fire_removed();
        let hook = self.on_remove.read().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(hook) = hook {
            hook(&removed);
        }
        true
    }

    /// Binds `factory` to the exact component type `key` and/or to every type
    /// of `group`. Either may be empty; neither may already be bound.
    pub fn register_factory<F>(&self, key: &str, group: &str, factory: F) -> Result<()>
    where
        F: Fn(&Arc<ComponentHub>, &str, &str, &str, &str) -> Result<Arc<NetworkComponent>> + Send + Sync + 'static,
    {
        let keys: Vec<String> = [
            (!group.is_empty()).then(|| group_factory_key(group)),
            (!key.is_empty()).then(|| key.to_string()),
        ]
        .into_iter()
        .flatten()
        .collect();

        let mut factories = self.factories.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(bound) = keys.iter().find(|k| factories.contains_key(k.as_str())) {
            return Err(LinkError::AlreadyRegistered(format!("factory {}", bound)));
        }
        let factory: Factory = Arc::new(factory);
        for k in keys {
            factories.insert(k, Arc::clone(&factory));
        }
        Ok(())
    }

    pub fn unregister_factory(&self, key: &str, group: &str) {
        let mut factories = self.factories.write().unwrap_or_else(PoisonError::into_inner);
        if !group.is_empty() {
            factories.remove(&group_factory_key(group));
        }
        if !key.is_empty() {
            factories.remove(key);
        }
    }

    pub fn has_factory(&self, key: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    fn resolve_factory(&self, key: &str, group: &str) -> Option<Factory> {
        let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
        factories
            .get(key)
            .or_else(|| factories.get(&group_factory_key(group)))
            .or_else(|| factories.get(WILDCARD))
            .cloned()
    }

    /// Builds a component through the first factory bound to `key`, then to
    /// `group`, then globally, and indexes it.
    pub fn create_component(self: &Arc<Self>, key: &str, group: &str, owner: &str, cid: &str) -> Result<Arc<NetworkComponent>> {
        self.build(key, group, owner, cid, Creator::Local)
    }

    fn build(self: &Arc<Self>, key: &str, group: &str, owner: &str, cid: &str, creator: Creator) -> Result<Arc<NetworkComponent>> {
        let factory = self.resolve_factory(key, group).ok_or_else(|| LinkError::FactoryNotFound {
            group: group.to_string(),
            factory: key.to_string(),
        })?;
        // factories may join the hub before returning
        let mirroring = creator == Creator::Remote;
        if mirroring {
            self.mirroring.lock().unwrap_or_else(PoisonError::into_inner).insert(cid.to_string());
        }
        let built = factory(self, key, group, owner, cid);
        if mirroring {
            self.mirroring.lock().unwrap_or_else(PoisonError::into_inner).remove(cid);
        }
        let component = built?;
        component.set_creator(creator);
        self.add(&component);
        Ok(component)
    }

    pub fn find(&self, cid: &str) -> Option<Arc<NetworkComponent>> {
        self.components
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .all
            .get(cid)
            .cloned()
    }

    pub fn list_group(&self, group: &str) -> Vec<Arc<NetworkComponent>> {
        self.components
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .groups
            .get(group)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.components.read().unwrap_or_else(PoisonError::into_inner).all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tears down everything outside `except_group`. With an empty
    /// `except_group` every factory and component goes; otherwise only group
    /// factories of other groups and components of other groups are dropped.
    pub fn clear(&self, except_group: &str) {
        {
            let keep = group_factory_key(except_group);
            let mut factories = self.factories.write().unwrap_or_else(PoisonError::into_inner);
            factories.retain(|k, _| !except_group.is_empty() && !(k.ends_with("-*") && *k != keep));
        }
        let doomed: Vec<Arc<NetworkComponent>> = self
            .components
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .all
            .values()
            .filter(|c| except_group.is_empty() || c.group() != except_group)
            .cloned()
            .collect();
        for component in doomed {
            self.remove(&component);
        }
    }

    /// Removed components are evicted and reported once as tombstones;
    /// components with nothing drained are left out.
    pub fn sync_send(&self, group: &str, whole: bool) -> Vec<SyncComponent> {
        let mut components = Vec::new();
        for c in self.list_group(group) {
            if c.is_removed() {
                if self.remove(&c) {
                    components.push(SyncComponent::tombstone(c.factory(), c.cid(), c.owner()));
                }
                continue;
            }
            let record = c.send_update(whole);
            if !record.is_empty() {
                components.push(record);
            }
        }
        components
    }

    /// A missing factory aborts the batch with [`LinkError::FactoryNotFound`]
    /// and skips whole-sync eviction.
    pub fn sync_recv(self: &Arc<Self>, group: &str, components: &[SyncComponent], whole: bool) -> Result<()> {
        let mut seen = AHashSet::new();
        let mut synced = Vec::new();
        let mut failure = None;

        for c in components {
            let found = self.find(&c.cid);
            if c.removed {
                if let Some(component) = found {
                    self.remove(&component);
                }
                continue;
            }
            seen.insert(c.cid.as_str());
            let component = match found {
                Some(component) => component,
                None => match self.build(&c.factory, group, &c.owner, &c.cid, Creator::Remote) {
                    Ok(component) => component,
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                },
            };
            component.set_resyncing(whole);
            if !c.props.is_empty() {
                component.recv_props(&c.props);
            }
            if !c.triggers.is_empty() {
                component.recv_triggers(&c.triggers);
            }
            component.set_resyncing(false);
            if component.has_synced_hook() {
                synced.push(component);
            }
        }

        if whole && failure.is_none() {
            for c in self.list_group(group) {
                if c.creator() == Creator::Remote && !seen.contains(c.cid()) {
                    self.remove(&c);
                }
            }
        }
        for c in synced {
            c.fire_synced();
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Props, Triggers};
    use crate::trigger::TriggerHandler;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Barrier, Mutex};
    use std::thread;

    fn player_factory(hub: &Arc<ComponentHub>, key: &str, group: &str, owner: &str, cid: &str) -> Result<Arc<NetworkComponent>> {
        Ok(NetworkComponent::new(hub, key, group, owner, cid))
    }

    fn player(hub: &Arc<ComponentHub>, cid: &str, seat: i64) -> Arc<NetworkComponent> {
        let c = NetworkComponent::new(hub, "Player", "g", "", cid);
        c.set_property("seat", &seat).unwrap();
        c
    }

    #[test]
    fn test_sync_send_is_sparse() {
        let hub = ComponentHub::new();
        let p1 = player(&hub, "p1", 2);
        let _p2 = player(&hub, "p2", 3);

        assert_eq!(hub.sync_send("g", false).len(), 2);
        assert!(hub.sync_send("g", false).is_empty());

        p1.set_property("seat", &5).unwrap();
        let delta = hub.sync_send("g", false);
        assert_eq!(delta.len(), 1);
        assert_eq!(delta[0].cid, "p1");
        assert_eq!(delta[0].props["seat"], json!(5));

        assert_eq!(hub.sync_send("g", true).len(), 2);
        assert!(hub.sync_send("other", false).is_empty());
    }

    #[test]
    fn test_removed_component_yields_one_tombstone() {
        let hub = ComponentHub::new();
        let removed = Arc::new(AtomicUsize::new(0));
        let p1 = player(&hub, "p1", 2);
        let counter = removed.clone();
        p1.on_remove(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        hub.sync_send("g", false);

        p1.remove();
        let delta = hub.sync_send("g", false);
        assert_eq!(delta.len(), 1);
        assert!(delta[0].removed);
        assert!(hub.find("p1").is_none());
        assert_eq!(removed.load(Ordering::SeqCst), 1);

        assert!(hub.sync_send("g", false).is_empty());
        p1.set_property("seat", &9).unwrap();
        assert!(hub.find("p1").is_none());
    }

    #[test]
    fn test_player_seat_reaches_peer() {
        let server = ComponentHub::new();
        let p1 = NetworkComponent::new(&server, "Player", "g", "", "p1");
        p1.set_property("seat", &2).unwrap();
        let delta = server.sync_send("g", false);
        assert_eq!(delta.len(), 1);
        assert_eq!(delta[0].props["seat"], json!(2));

        let client = ComponentHub::new();
        client.register_factory("Player", "", player_factory).unwrap();
        client.sync_recv("g", &delta, false).unwrap();

        let mirror = client.find("p1").unwrap();
        assert_eq!(mirror.get_property_as::<i64>("seat").unwrap(), 2);
        assert_eq!(mirror.creator(), Creator::Remote);
    }

    #[test]
    fn test_whole_round_trip_and_reconcile() {
        let server = ComponentHub::new();
        let a = player(&server, "a", 1);
        let _b = player(&server, "b", 2);
        let client = ComponentHub::new();
        client.register_factory("", "g", player_factory).unwrap();
        let local = player(&client, "local", 7);

        client.sync_recv("g", &server.sync_send("g", true), true).unwrap();
        assert_eq!(client.len(), 3);
        assert_eq!(client.find("b").unwrap().get_property("seat").unwrap(), json!(2));

        a.remove();
        server.sync_send("g", false);
        let whole = server.sync_send("g", true);
        assert_eq!(whole.len(), 1);
        client.sync_recv("g", &whole, true).unwrap();

        assert!(client.find("a").is_none());
        assert!(client.find("b").is_some());
        assert!(Arc::ptr_eq(&client.find("local").unwrap(), &local));
    }

    #[test]
    fn test_missing_factory_aborts_batch() {
        let server = ComponentHub::new();
        let p = NetworkComponent::new(&server, "Player", "g", "", "p1");
        p.set_property("seat", &1).unwrap();
        let delta = server.sync_send("g", false);

        let client = ComponentHub::new();
        match client.sync_recv("g", &delta, false) {
            Err(LinkError::FactoryNotFound { factory, group }) => {
                assert_eq!(factory, "Player");
                assert_eq!(group, "g");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(client.is_empty());
    }

    #[test]
    fn test_factory_precedence_and_duplicates() {
        let hub = ComponentHub::new();
        let used = Arc::new(Mutex::new(Vec::new()));
        for (key, group, label) in [("Boss", "", "exact"), ("", "g", "group"), (WILDCARD, "", "global")] {
            let used = used.clone();
            hub.register_factory(key, group, move |hub: &Arc<ComponentHub>, key: &str, group: &str, owner: &str, cid: &str| {
                used.lock().unwrap().push(label);
                Ok(NetworkComponent::new(hub, key, group, owner, cid))
            })
            .unwrap();
        }
        assert!(matches!(hub.register_factory("Boss", "", player_factory), Err(LinkError::AlreadyRegistered(_))));
        assert!(matches!(hub.register_factory("Other", "g", player_factory), Err(LinkError::AlreadyRegistered(_))));
        assert!(!hub.has_factory("Other"));

        hub.create_component("Boss", "g", "", "c1").unwrap();
        hub.create_component("Bullet", "g", "", "c2").unwrap();
        hub.create_component("Bullet", "h", "", "c3").unwrap();
        assert_eq!(*used.lock().unwrap(), vec!["exact", "group", "global"]);
        assert_eq!(hub.len(), 3);

        hub.unregister_factory(WILDCARD, "g");
        assert!(hub.create_component("Bullet", "g", "", "c4").is_err());
    }

    #[test]
    #[should_panic(expected = "registered by another instance")]
    fn test_duplicate_cid_panics() {
        let hub = ComponentHub::new();
        let _a = player(&hub, "p1", 1);
        let _b = player(&hub, "p1", 2);
    }

    #[test]
    fn test_hooks_may_reenter_hub() {
        let hub = ComponentHub::new();
        let weak = Arc::downgrade(&hub);
        hub.set_on_remove(move |c| {
            if let Some(hub) = weak.upgrade() {
                if c.cid() == "old" {
                    let replacement = NetworkComponent::new(&hub, "Player", "g", "", "new");
                    replacement.register_props();
                }
            }
        });
        let old = player(&hub, "old", 1);
        assert!(hub.remove(&old));
        assert!(hub.find("new").is_some());
        assert!(!hub.remove(&old));
    }

    #[test]
    fn test_synced_hooks_see_whole_batch() {
        let server = ComponentHub::new();
        let _a = player(&server, "a", 1);
        let _b = player(&server, "b", 2);
        let delta = server.sync_send("g", true);

        let client = ComponentHub::new();
        let observed = Arc::new(Mutex::new(Vec::new()));
        let sink = observed.clone();
        let weak = Arc::downgrade(&client);
        client
            .register_factory("Player", "", move |hub: &Arc<ComponentHub>, key: &str, group: &str, owner: &str, cid: &str| {
                let c = NetworkComponent::new(hub, key, group, owner, cid);
                let sink = sink.clone();
                let weak = weak.clone();
                c.on_synced(move |_| {
                    let count = weak.upgrade().map(|h| h.len()).unwrap_or(0);
                    sink.lock().unwrap().push(count);
                });
                Ok(c)
            })
            .unwrap();
        client.sync_recv("g", &delta, true).unwrap();
        assert_eq!(*observed.lock().unwrap(), vec![2, 2]);
    }

    #[test]
    fn test_triggers_replay_on_mirror() {
        let server = ComponentHub::new();
        let boss = NetworkComponent::new(&server, "Boss", "g", "", "boss");
        boss.register_trigger("hit", TriggerHandler::new(|_: i64| {})).unwrap();
        boss.fire_trigger("hit", &10).unwrap();
        let delta = server.sync_send("g", false);
        assert_eq!(delta[0].triggers["hit"], vec![json!(10)]);
        assert!(delta[0].props.is_empty());

        let client = ComponentHub::new();
        let hits = Arc::new(Mutex::new(Vec::new()));
        let sink = hits.clone();
        client
            .register_factory("Boss", "", move |hub: &Arc<ComponentHub>, key: &str, group: &str, owner: &str, cid: &str| {
                let c = NetworkComponent::new(hub, key, group, owner, cid);
                let sink = sink.clone();
                c.register_trigger("hit", TriggerHandler::new(move |v: i64| sink.lock().unwrap().push(v)))?;
                Ok(c)
            })
            .unwrap();
        client.sync_recv("g", &delta, false).unwrap();
        assert_eq!(*hits.lock().unwrap(), vec![10]);
    }

    #[test]
    fn test_clear_keeps_preserved_group() {
        let hub = ComponentHub::new();
        hub.register_factory("Player", "g", player_factory).unwrap();
        hub.register_factory("", "h", player_factory).unwrap();
        let _g = player(&hub, "p1", 1);
        let h = NetworkComponent::new(&hub, "Player", "h", "", "p2");
        h.set_property("seat", &1).unwrap();

        hub.clear("g");
        assert!(hub.find("p1").is_some());
        assert!(hub.find("p2").is_none());
        assert!(hub.has_factory("Player"));
        assert!(hub.has_factory(&group_factory_key("g")));
        assert!(!hub.has_factory(&group_factory_key("h")));

        hub.clear("");
        assert!(hub.is_empty());
        assert!(!hub.has_factory("Player"));
    }

    #[test]
    fn test_empty_props_and_triggers_are_not_replayed() {
        let hub = ComponentHub::new();
        hub.register_factory("Player", "", player_factory).unwrap();
        let record = SyncComponent::update("Player", "p1", "u1", Props::new(), Triggers::new());
        hub.sync_recv("g", &[record], false).unwrap();
        let mirror = hub.find("p1").unwrap();
        assert!(mirror.is_owned_by("u1"));
        assert_eq!(mirror.property_count(), 0);
    }

    #[test]
    fn test_delta_tombstone_removes_mirror() {
        let server = ComponentHub::new();
        let a = player(&server, "a", 1);
        let client = ComponentHub::new();
        client.register_factory("Player", "", player_factory).unwrap();
        client.sync_recv("g", &server.sync_send("g", false), false).unwrap();

        let removed = Arc::new(AtomicUsize::new(0));
        let counter = removed.clone();
        client.find("a").unwrap().on_remove(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        a.remove();
        let delta = server.sync_send("g", false);
        assert_eq!(delta.len(), 1);
        assert!(delta[0].removed);
        client.sync_recv("g", &delta, false).unwrap();
        assert!(client.find("a").is_none());
        assert_eq!(removed.load(Ordering::SeqCst), 1);

        client.sync_recv("g", &delta, false).unwrap();
        assert_eq!(removed.load(Ordering::SeqCst), 1);
        assert!(client.is_empty());
    }

    #[test]
    fn test_observer_sees_resync_only_during_whole_apply() {
        let server = ComponentHub::new();
        let a = player(&server, "a", 1);
        let client = ComponentHub::new();
        let flags = Arc::new(Mutex::new(Vec::new()));
        let sink = flags.clone();
        let weak = Arc::downgrade(&client);
        client
            .register_factory("Player", "", move |hub: &Arc<ComponentHub>, key: &str, group: &str, owner: &str, cid: &str| {
                let c = NetworkComponent::new(hub, key, group, owner, cid);
                let sink = sink.clone();
                let weak = weak.clone();
                let own = cid.to_string();
                c.on_property_update("seat", move |_, _| {
                    let resyncing = weak.upgrade().and_then(|h| h.find(&own)).map(|c| c.is_resyncing());
                    sink.lock().unwrap().push(resyncing);
                });
                Ok(c)
            })
            .unwrap();

        client.sync_recv("g", &server.sync_send("g", true), true).unwrap();
        assert!(!client.find("a").unwrap().is_resyncing());

        a.set_property("seat", &4).unwrap();
        client.sync_recv("g", &server.sync_send("g", false), false).unwrap();
        assert_eq!(*flags.lock().unwrap(), vec![Some(true), Some(false)]);
    }

    #[test]
    fn test_concurrent_writers_lose_no_dirty_keys() {
        let server = ComponentHub::new();
        let sent = Arc::new(AtomicUsize::new(0));
        let writers: Vec<Arc<NetworkComponent>> = (0..4)
            .map(|i| {
                let c = NetworkComponent::new(&server, "Player", "g", "", &format!("p{}", i));
                let sent = sent.clone();
                c.register_trigger("hit", TriggerHandler::new(move |_: i64| {
                    sent.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
                c
            })
            .collect();

        let client = ComponentHub::new();
        let received = Arc::new(AtomicUsize::new(0));
        let counter = received.clone();
        client
            .register_factory("Player", "", move |hub: &Arc<ComponentHub>, key: &str, group: &str, owner: &str, cid: &str| {
                let c = NetworkComponent::new(hub, key, group, owner, cid);
                let counter = counter.clone();
                c.register_trigger("hit", TriggerHandler::new(move |_: i64| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }))?;
                Ok(c)
            })
            .unwrap();

        let done = AtomicBool::new(false);
        thread::scope(|scope| {
            let syncer = scope.spawn(|| {
                while !done.load(Ordering::Acquire) {
                    client.sync_recv("g", &server.sync_send("g", false), false).unwrap();
                }
            });
            let handles: Vec<_> = writers
                .iter()
                .map(|c| {
                    scope.spawn(move || {
                        for n in 0..200i64 {
                            c.set_property(&format!("k{}", n % 10), &n).unwrap();
                            c.set_property("last", &n).unwrap();
                            c.fire_trigger("hit", &n).unwrap();
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
            done.store(true, Ordering::Release);
            syncer.join().unwrap();
        });
        client.sync_recv("g", &server.sync_send("g", false), false).unwrap();

        for c in &writers {
            let mirror = client.find(c.cid()).unwrap();
            assert_eq!(mirror.get_property_as::<i64>("last").unwrap(), 199);
            for k in 0..10i64 {
                assert_eq!(mirror.get_property_as::<i64>(&format!("k{}", k)).unwrap(), 190 + k);
            }
        }
        assert!(sent.load(Ordering::SeqCst) > 0);
        assert_eq!(sent.load(Ordering::SeqCst), received.load(Ordering::SeqCst));
    }

    #[test]
    fn test_racing_sync_passes_emit_one_tombstone() {
        let hub = ComponentHub::new();
        for round in 0..50 {
            let cid = format!("p{}", round);
            let p = player(&hub, &cid, 1);
            hub.sync_send("g", false);
            p.remove();

            let barrier = Barrier::new(2);
            let tombstones = AtomicUsize::new(0);
            thread::scope(|scope| {
                for _ in 0..2 {
                    scope.spawn(|| {
                        barrier.wait();
                        let delta = hub.sync_send("g", false);
                        let count = delta.iter().filter(|c| c.removed && c.cid == cid).count();
                        tombstones.fetch_add(count, Ordering::SeqCst);
                    });
                }
            });
            assert_eq!(tombstones.load(Ordering::SeqCst), 1);
        }
        assert!(hub.is_empty());
    }

    #[test]
    fn test_add_hook_sees_mirrors_as_remote() {
        let server = ComponentHub::new();
        let _a = player(&server, "a", 1);
        let boss = NetworkComponent::new(&server, "Boss", "g", "", "boss");
        boss.register_trigger("hit", TriggerHandler::new(|_: i64| {})).unwrap();
        boss.fire_trigger("hit", &3).unwrap();
        let delta = server.sync_send("g", true);
        assert_eq!(delta.len(), 2);

        let client = ComponentHub::new();
        client.register_factory("Player", "", player_factory).unwrap();
        client
            .register_factory("Boss", "", |hub: &Arc<ComponentHub>, key: &str, group: &str, owner: &str, cid: &str| {
                let c = NetworkComponent::new(hub, key, group, owner, cid);
                c.register_trigger("hit", TriggerHandler::new(|_: i64| {}))?;
                Ok(c)
            })
            .unwrap();
        let added = Arc::new(Mutex::new(Vec::new()));
        let sink = added.clone();
        client.set_on_add(move |c| sink.lock().unwrap().push((c.cid().to_string(), c.creator())));

        let _local = player(&client, "local", 3);
        client.sync_recv("g", &delta, true).unwrap();

        let mut added = added.lock().unwrap().clone();
        added.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            added,
            vec![
                ("a".to_string(), Creator::Remote),
                ("boss".to_string(), Creator::Remote),
                ("local".to_string(), Creator::Local),
            ]
        );
        assert_eq!(client.create_component("Player", "g", "", "made").unwrap().creator(), Creator::Local);
    }
}

use crate::protocol::{Props, SyncComponent, Triggers};
use crate::session::Session;
use ahash::AHashMap;
use std::fmt;
use std::sync::Arc;

/// Decides whether a receiving session may see a value.
pub type Access = Arc<dyn Fn(&Session) -> bool + Send + Sync>;

pub fn access<F>(predicate: F) -> Access
where
    F: Fn(&Session) -> bool + Send + Sync + 'static,
{
    Arc::new(predicate)
}

/// Visibility rules attached to an outbound [`SyncComponent`]. Props are
/// restricted per top-level key, trigger values one by one.
#[derive(Clone, Default)]
pub struct AccessRules {
    props: AHashMap<String, Access>,
    triggers: AHashMap<String, Vec<Option<Access>>>,
}

impl AccessRules {
    pub fn is_empty(&self) -> bool {
        self.props.is_empty() && self.triggers.is_empty()
    }

    pub fn restrict_prop(&mut self, key: &str, access: Access) {
        self.props.insert(key.to_string(), access);
    }

    /// `values[i]` guards the i-th value sent on trigger `name`.
    pub fn restrict_trigger(&mut self, name: &str, values: Vec<Option<Access>>) {
        if values.iter().any(Option::is_some) {
            self.triggers.insert(name.to_string(), values);
        }
    }

    pub fn allows_prop(&self, key: &str, session: &Session) -> bool {
        self.props.get(key).map_or(true, |access| access(session))
    }

    /// Copy of `component` holding only what `session` may see. Trigger
    /// names left without values are dropped.
    pub fn apply(&self, component: &SyncComponent, session: &Session) -> SyncComponent {
        let props: Props = component
            .props
            .iter()
            .filter(|(k, _)| self.allows_prop(k, session))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut triggers = Triggers::new();
        for (name, values) in &component.triggers {
            let visible: Vec<_> = match self.triggers.get(name) {
                Some(rules) => values
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| rules.get(*i).and_then(Option::as_ref).map_or(true, |access| access(session)))
                    .map(|(_, v)| v.clone())
                    .collect(),
                None => values.clone(),
            };
            if !visible.is_empty() {
                triggers.insert(name.clone(), visible);
            }
        }

        SyncComponent {
            factory: component.factory.clone(),
            cid: component.cid.clone(),
            owner: component.owner.clone(),
            removed: component.removed,
            props,
            triggers,
            access: AccessRules::default(),
        }
    }
}

impl PartialEq for AccessRules {
    fn eq(&self, other: &Self) -> bool {
        let same_props = self.props.len() == other.props.len()
            && self
                .props
                .iter()
                .all(|(k, a)| other.props.get(k).map_or(false, |b| Arc::ptr_eq(a, b)));
        let same_triggers = self.triggers.len() == other.triggers.len()
            && self.triggers.iter().all(|(k, a)| {
                other.triggers.get(k).map_or(false, |b| {
                    a.len() == b.len()
                        && a.iter().zip(b).all(|pair| match pair {
                            (Some(x), Some(y)) => Arc::ptr_eq(x, y),
                            (None, None) => true,
                            _ => false,
                        })
                })
            });
        same_props && same_triggers
    }
}

impl fmt::Debug for AccessRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut props: Vec<&String> = self.props.keys().collect();
        props.sort();
        let mut triggers: Vec<&String> = self.triggers.keys().collect();
        triggers.sort();
        f.debug_struct("AccessRules")
            .field("props", &props)
            .field("triggers", &triggers)
            .finish()
    }
}

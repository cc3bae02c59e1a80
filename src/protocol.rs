use crate::access::AccessRules;
use crate::error::{LinkError, Result};
use crate::session::Session;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub type ComponentId = String;

/// Property delta: top-level key to its current value.
pub type Props = serde_json::Map<String, Value>;

/// Trigger delta: trigger name to the values fired since the last drain.
pub type Triggers = HashMap<String, Vec<Value>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncComponent {
    pub factory: String,
    pub cid: ComponentId,
    pub owner: String,
    pub removed: bool,
    pub props: Props,
    pub triggers: Triggers,
    /// Per-session visibility of the values above. Never encoded.
    #[serde(skip)]
    pub access: AccessRules,
}

impl SyncComponent {
    pub fn update(factory: &str, cid: &str, owner: &str, props: Props, triggers: Triggers) -> Self {
        Self {
            factory: factory.to_string(),
            cid: cid.to_string(),
            owner: owner.to_string(),
            removed: false,
            props,
            triggers,
            access: AccessRules::default(),
        }
    }

    pub fn tombstone(factory: &str, cid: &str, owner: &str) -> Self {
        Self {
            factory: factory.to_string(),
            cid: cid.to_string(),
            owner: owner.to_string(),
            removed: true,
            props: Props::new(),
            triggers: Triggers::new(),
            access: AccessRules::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty() && self.triggers.is_empty()
    }
}

/// One delta (or whole snapshot) of a group, as pushed to connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncData {
    pub id: String,
    pub group: String,
    /// When set, `components` lists every live component of the group and the
    /// receiver drops remote mirrors that are absent from it.
    pub whole: bool,
    pub components: Vec<SyncComponent>,
}

impl SyncData {
    pub fn new(group: &str, whole: bool, components: Vec<SyncComponent>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            group: group.to_string(),
            whole,
            components,
        }
    }

    pub fn is_updated(&self) -> bool {
        !self.components.is_empty() || self.whole
    }

    pub fn tombstone_count(&self) -> usize {
        self.components.iter().filter(|c| c.removed).count()
    }

    /// The envelope as `session` may see it, with restricted props and
    /// trigger values removed.
    pub fn encode_for(&self, session: &Session) -> SyncData {
        if self.components.iter().all(|c| c.access.is_empty()) {
            return self.clone();
        }
        SyncData {
            id: self.id.clone(),
            group: self.group.clone(),
            whole: self.whole,
            components: self.components.iter().map(|c| c.access.apply(c, session)).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallArg {
    pub id: String,
    pub cid: ComponentId,
    pub name: String,
    /// JSON-encoded argument.
    pub arg: String,
}

impl CallArg {
    pub fn new<A: Serialize>(cid: &str, name: &str, arg: &A) -> Result<Self> {
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            cid: cid.to_string(),
            name: name.to_string(),
            arg: serde_json::to_string(arg)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallResult {
    pub id: String,
    pub cid: ComponentId,
    pub name: String,
    /// JSON-encoded result, `"null"` for handlers without a return value.
    pub result: String,
    pub error: Option<String>,
}

impl CallResult {
    pub fn ok(arg: &CallArg, result: String) -> Self {
        Self {
            id: arg.id.clone(),
            cid: arg.cid.clone(),
            name: arg.name.clone(),
            result,
            error: None,
        }
    }

    pub fn failed(arg: &CallArg, err: &LinkError) -> Self {
        Self {
            id: arg.id.clone(),
            cid: arg.cid.clone(),
            name: arg.name.clone(),
            result: "null".to_string(),
            error: Some(err.to_string()),
        }
    }

    pub fn into_result(self) -> Result<String> {
        match self.error {
            Some(message) => Err(LinkError::Remote(message)),
            None => Ok(self.result),
        }
    }
}

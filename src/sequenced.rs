use crate::component::NetworkComponent;
use crate::error::Result;
use crate::session::Session;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// A property stored on the wire as `[sequence, value]`, the sequence
/// growing by one on every set so receivers can tell repeated values apart.
pub struct SequencedValue<T> {
    component: Arc<NetworkComponent>,
    name: String,
    sequence: i64,
    value: T,
}

impl<T: Serialize> SequencedValue<T> {
    pub fn new(component: &Arc<NetworkComponent>, name: &str, value: T) -> Result<Self> {
        let mut sequenced = Self {
            component: Arc::clone(component),
            name: name.to_string(),
            sequence: 0,
            value,
        };
        sequenced.publish()?;
        Ok(sequenced)
    }

    /// Sends the value only to sessions `access` admits.
    pub fn with_access<F>(self, access: F) -> Self
    where
        F: Fn(&Session) -> bool + Send + Sync + 'static,
    {
        self.component.set_property_access(&self.name, access);
        self
    }

    pub fn sequence(&self) -> i64 {
        self.sequence
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn set(&mut self, value: T) -> Result<()> {
        self.value = value;
        self.publish()
    }

    fn publish(&mut self) -> Result<()> {
        self.sequence += 1;
        self.component.set_property(&self.name, &(self.sequence, &self.value))
    }
}

/// Reads back a sequenced property as `(sequence, value)`.
pub fn read_sequenced<T: DeserializeOwned>(component: &NetworkComponent, name: &str) -> Result<(i64, T)> {
    component.get_property_as(name)
}

impl<T: fmt::Debug> fmt::Debug for SequencedValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{:?}", self.component.cid(), self.name, self.value)
    }
}

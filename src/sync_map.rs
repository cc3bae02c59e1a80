use crate::error::{LinkError, Result};
use crate::protocol::Props;
use ahash::AHashSet;
use serde_json::Value;

#[derive(Debug, Default, Clone)]
pub struct SyncMap {
    value: Props,
    updated: AHashSet<String>,
    removed: AHashSet<String>,
}

fn split_path(path: &str) -> Result<Vec<&str>> {
    let parts: Vec<&str> = path.split('/').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(LinkError::InvalidPath(path.to_string()));
    }
    Ok(parts)
}

impl SyncMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Result<&Value> {
        let parts = split_path(path)?;
        let mut current = self.value.get(parts[0]);
        for part in &parts[1..] {
            current = current.and_then(|v| v.as_object()).and_then(|m| m.get(*part));
        }
        current.ok_or_else(|| LinkError::NotFound(path.to_string()))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_ok()
    }

    /// Returns the top-level key marked dirty.
    pub fn set(&mut self, path: &str, val: Value) -> Result<String> {
        let parts = split_path(path)?;
        let (last, parents) = parts.split_last().ok_or_else(|| LinkError::InvalidPath(path.to_string()))?;

        let mut target = &mut self.value;
        for part in parents {
            let entry = target
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Props::new()));
            target = entry
                .as_object_mut()
                .ok_or_else(|| LinkError::InvalidPath(path.to_string()))?;
        }
        target.insert(last.to_string(), val);

        let key = parts[0].to_string();
        self.updated.insert(key.clone());
        Ok(key)
    }

    /// Removes `path`. The removal is recorded but never emitted by [`SyncMap::drain`].
    pub fn delete(&mut self, path: &str) -> Result<Value> {
        let parts = split_path(path)?;
        let (last, parents) = parts.split_last().ok_or_else(|| LinkError::InvalidPath(path.to_string()))?;

        let mut target = &mut self.value;
        for part in parents {
            target = target
                .get_mut(*part)
                .and_then(|v| v.as_object_mut())
                .ok_or_else(|| LinkError::NotFound(path.to_string()))?;
        }
        let removed = target
            .remove(*last)
            .ok_or_else(|| LinkError::NotFound(path.to_string()))?;
        self.removed.insert(path.to_string());
        Ok(removed)
    }

    pub fn clear(&mut self) {
        for key in self.value.keys() {
            self.removed.insert(key.clone());
        }
        self.value.clear();
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// A whole drain leaves dirty tracking untouched.
    pub fn drain(&mut self, whole: bool) -> Props {
        if whole {
            return self.value.clone();
        }
        let mut delta = Props::new();
        for key in self.updated.drain() {
            if let Some(v) = self.value.get(&key) {
                delta.insert(key, v.clone());
            }
        }
        delta
    }

    /// Applies a received delta. Last write wins; merged keys are not marked dirty.
    pub fn merge(&mut self, update: &Props) {
        for (k, v) in update {
            self.value.insert(k.clone(), v.clone());
        }
    }

    pub fn dirty_keys(&self) -> Vec<String> {
        self.updated.iter().cloned().collect()
    }

    pub fn removed_keys(&self) -> Vec<String> {
        self.removed.iter().cloned().collect()
    }

    pub fn snapshot(&self) -> Props {
        self.value.clone()
    }
}

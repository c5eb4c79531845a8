use std::collections::BTreeSet;

use crate::ids::EntityId;

/// Cache tag for a stored record, invalidated whenever that record is saved.
pub fn record_tag(entity_type: &str, id: EntityId) -> String {
    format!("{entity_type}:{id}")
}

/// Cache dependencies emitted alongside a resolved record.
///
/// `tags` name stored data whose change invalidates the result; `keys`
/// separate variants of the same record so one slot's overrides never share
/// a cache entry with another slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheMetadata {
    tags: BTreeSet<String>,
    keys: BTreeSet<String>,
}

impl CacheMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) {
        self.tags.insert(tag.into());
    }

    pub fn add_key(&mut self, key: impl Into<String>) {
        self.keys.insert(key.into());
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }
}

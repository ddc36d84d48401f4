use std::collections::BTreeMap;

use crate::types::Item;

/// Additive counters accumulated for one entity across a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntityDelta {
    pub downloads: i64,
    pub users: i64,
}

/// Per-entity deltas for one batch. Keys are `app_uuid` values; entries are
/// created zero-valued on first access so the defaulting is visible here
/// rather than hidden in the accumulation loop.
#[derive(Debug, Clone, Default)]
pub struct DeltaMap {
    entries: BTreeMap<String, EntityDelta>,
}

impl DeltaMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entity's delta, inserting a zero-valued one on first access.
    pub fn entry_or_zero(&mut self, id: &str) -> &mut EntityDelta {
        self.entries.entry(id.to_string()).or_default()
    }

    /// Accumulate an item's counts. Items without an entity id, or with
    /// neither count, do not contribute.
    pub fn record(&mut self, item: &Item) {
        let Some(id) = item.app_uuid.as_deref() else {
            return;
        };
        if item.downloads_count.is_none() && item.users_count.is_none() {
            return;
        }
        let delta = self.entry_or_zero(id);
        delta.downloads += item.downloads_count.unwrap_or(0);
        delta.users += item.users_count.unwrap_or(0);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, id: &str) -> Option<&EntityDelta> {
        self.entries.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &EntityDelta)> {
        self.entries.iter()
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub(crate) fn into_inner(self) -> BTreeMap<String, EntityDelta> {
        self.entries
    }
}

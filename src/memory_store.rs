//! In-memory attribute store.

use crate::error::SessionResult;
use crate::session::{RecordDelta, SessionRecord};
use crate::traits::AttributeStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::time::Duration;

/// In-memory [`AttributeStore`] over concurrent maps.
///
/// The reference backend: useful for tests and single-process embedding,
/// and the simplest demonstration of the store contract. It has no
/// native TTL, so expired records stay until the sweeper or a lazy
/// lookup removes them; the `ttl` hints on writes are ignored.
///
/// Principal-index sets are mutated under the map's per-key lock, so
/// concurrent saves for different sessions of one principal do not lose
/// updates.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: DashMap<String, SessionRecord>,
    index: DashMap<String, HashSet<String>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, expired or not.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl AttributeStore for InMemoryStore {
    async fn load(&self, id: &str) -> SessionResult<Option<SessionRecord>> {
        Ok(self.records.get(id).map(|r| r.clone()))
    }

    async fn insert(&self, record: &SessionRecord, _ttl: Option<Duration>) -> SessionResult<()> {
        self.records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn update(
        &self,
        id: &str,
        delta: &RecordDelta,
        _ttl: Option<Duration>,
    ) -> SessionResult<()> {
        if let Some(mut record) = self.records.get_mut(id) {
            if let Some(last_accessed) = delta.last_accessed_time {
                record.last_accessed_time = last_accessed;
            }
            if let Some(interval) = delta.max_inactive_interval {
                record.max_inactive_interval = interval;
            }
            for (name, value) in &delta.attributes {
                match value {
                    Some(value) => {
                        record.attributes.insert(name.clone(), value.clone());
                    }
                    None => {
                        record.attributes.remove(name);
                    }
                }
            }
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> SessionResult<bool> {
        Ok(self.records.remove(id).is_some())
    }

    async fn index_add(&self, principal: &str, id: &str) -> SessionResult<()> {
        self.index
            .entry(principal.to_string())
            .or_default()
            .insert(id.to_string());
        Ok(())
    }

    async fn index_remove(&self, principal: &str, id: &str) -> SessionResult<()> {
        if let Some(mut members) = self.index.get_mut(principal) {
            members.remove(id);
        }
        self.index.remove_if(principal, |_, members| members.is_empty());
        Ok(())
    }

    async fn index_members(&self, principal: &str) -> SessionResult<HashSet<String>> {
        Ok(self
            .index
            .get(principal)
            .map(|members| members.clone())
            .unwrap_or_default())
    }

    async fn expired_before(&self, cutoff: DateTime<Utc>) -> SessionResult<Vec<String>> {
        Ok(self
            .records
            .iter()
            .filter(|entry| entry.value().is_expired_at(cutoff))
            .map(|entry| entry.key().clone())
            .collect())
    }
}

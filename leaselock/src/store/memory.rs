use super::{CasOutcome, DeleteOutcome, KvEntry, KvStore, Version, ABSENT};
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Linearizable in-process store.
///
/// Versions come from one store-wide counter, like Consul's raft index, so
/// a key that is deleted and recreated never reuses an old version.
#[derive(Debug)]
pub struct InMemoryKvStore {
    data: DashMap<String, KvEntry>,
    index: AtomicU64,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            index: AtomicU64::new(0),
        }
    }

    /// Highest version handed out so far.
    pub fn index(&self) -> Version {
        self.index.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn next_version(&self) -> Version {
        self.index.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<KvEntry>> {
        Ok(self.data.get(key).map(|entry| entry.clone()))
    }

    async fn put_if_version(
        &self,
        key: &str,
        value: Bytes,
        expected: Version,
    ) -> Result<CasOutcome> {
        // The entry guard holds the shard lock, so check and write are atomic.
        match self.data.entry(key.to_string()) {
            Entry::Vacant(slot) if expected == ABSENT => {
                let version = self.next_version();
                slot.insert(KvEntry { value, version });
                Ok(CasOutcome::Written(version))
            }
            Entry::Occupied(mut slot) if expected != ABSENT && slot.get().version == expected => {
                let version = self.next_version();
                slot.insert(KvEntry { value, version });
                Ok(CasOutcome::Written(version))
            }
            _ => Ok(CasOutcome::VersionConflict),
        }
    }

    async fn delete_if_version(&self, key: &str, expected: Version) -> Result<DeleteOutcome> {
        match self.data.entry(key.to_string()) {
            Entry::Vacant(_) => Ok(DeleteOutcome::Deleted),
            Entry::Occupied(slot) if slot.get().version == expected => {
                slot.remove();
                Ok(DeleteOutcome::Deleted)
            }
            Entry::Occupied(_) => Ok(DeleteOutcome::VersionConflict),
        }
    }
}

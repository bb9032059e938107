//! Versioned key-value stores with single-key compare-and-swap.
//!
//! Every write to a key is assigned a new, strictly larger version by the
//! store. Conditional writes name the version they expect to replace; `0`
//! means "the key must not exist". A conflict is an ordinary outcome, not
//! an error: only transport failures surface as `Err`.

use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;

pub mod consul;
pub mod memory;

pub use consul::ConsulKvStore;
pub use memory::InMemoryKvStore;

/// Store-assigned modification index of a key.
pub type Version = u64;

/// Version expected by a write that may only create a key.
pub const ABSENT: Version = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    pub value: Bytes,
    pub version: Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The write landed; the key now carries this version.
    Written(Version),
    /// The key's current version did not match the expected one.
    VersionConflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    VersionConflict,
}

#[async_trait]
pub trait KvStore: Send + Sync + std::fmt::Debug {
    /// Current value and version, or `None` if the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<KvEntry>>;

    async fn put_if_version(&self, key: &str, value: Bytes, expected: Version)
        -> Result<CasOutcome>;

    /// Deleting a key that no longer exists succeeds.
    async fn delete_if_version(&self, key: &str, expected: Version) -> Result<DeleteOutcome>;
}

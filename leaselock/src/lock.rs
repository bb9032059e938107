//! Lease-based mutual exclusion over a CAS key-value store.
//!
//! Each protected resource maps to one key. Holding the lock means knowing
//! the store's current version of that key, and every mutation is a
//! conditional write against that version. Two racing writers can therefore
//! never both succeed; lease expiry only decides who is *allowed* to try
//! overwriting somebody else's record.

use crate::config::LockConfig;
use crate::record::LockRecord;
use crate::store::{CasOutcome, ConsulKvStore, DeleteOutcome, KvStore, Version, ABSENT};
use crate::time::{Clock, SystemClock, Timestamp};
use crate::Result;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub const DEFAULT_LEASE_SECONDS: u64 = 10;

/// Caller-side cursor for one lock key.
///
/// A version of `0` means the handle holds nothing. The version only ever
/// changes after the store confirms an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    key: String,
    last_known_version: Version,
}

impl LockHandle {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            last_known_version: ABSENT,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn last_known_version(&self) -> Version {
        self.last_known_version
    }

    pub fn is_held(&self) -> bool {
        self.last_known_version != ABSENT
    }

    fn release(&mut self) {
        self.last_known_version = ABSENT;
    }
}

/// Whether the record at a key may be overwritten by someone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakDecision {
    /// Lease is over (or the value is not a lock record); overwrite at this version.
    BreakAllowed(Version),
    NotExpiredYet,
    /// Nothing to break; the lock is free.
    NoRecord,
}

/// Random holder token, unique per lock request.
pub fn generate_holder_token() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Clone)]
pub struct LeaseLock {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    /// Lease assumed for records written without a timeout.
    default_lease_seconds: u64,
}

impl LeaseLock {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            default_lease_seconds: DEFAULT_LEASE_SECONDS,
        }
    }

    /// Lock backed by the Consul agents named in `config`.
    pub fn from_config(config: &LockConfig) -> Result<Self> {
        config.validate()?;
        let mut store = ConsulKvStore::new(config.endpoints.clone())?
            .with_selector(config.selector.build())
            .with_timeout(Duration::from_secs(config.request_timeout_secs));
        if let Some(token) = &config.acl_token {
            store = store.with_acl_token(token.clone());
        }
        Ok(Self::new(Arc::new(store)).with_default_lease(config.lease_seconds))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_default_lease(mut self, lease_seconds: u64) -> Self {
        self.default_lease_seconds = lease_seconds;
        self
    }

    pub fn default_lease_seconds(&self) -> u64 {
        self.default_lease_seconds
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    fn fresh_record(&self, holder_token: &str, lease_seconds: u64) -> Result<Bytes> {
        LockRecord::new(holder_token, self.clock.now(), lease_seconds).encode()
    }

    /// Take a free lock.
    ///
    /// Only succeeds if no record exists at the key. A handle that already
    /// holds a version is refused without touching the store.
    pub async fn lock(
        &self,
        handle: &mut LockHandle,
        holder_token: &str,
        lease_seconds: u64,
    ) -> Result<bool> {
        if handle.is_held() {
            error!(
                key = handle.key(),
                version = handle.last_known_version,
                "could not get lock: handle already holds it"
            );
            return Ok(false);
        }

        let value = self.fresh_record(holder_token, lease_seconds)?;
        match self.store.put_if_version(&handle.key, value, ABSENT).await? {
            CasOutcome::Written(version) => {
                handle.last_known_version = version;
                info!(key = handle.key(), holder = holder_token, version, "locked");
                Ok(true)
            }
            CasOutcome::VersionConflict => {
                warn!(key = handle.key(), holder = holder_token, "could not get lock: already held");
                Ok(false)
            }
        }
    }

    /// Renew the lease with a fresh start time.
    ///
    /// A handle that lost its version (say, after a restart) first reads the
    /// key, and only renews a record written by the same `holder_token`.
    /// On conflict the handle is released: someone else took the lock.
    pub async fn continue_lock(
        &self,
        handle: &mut LockHandle,
        holder_token: &str,
        lease_seconds: u64,
    ) -> Result<bool> {
        let expected = if handle.is_held() {
            handle.last_known_version
        } else {
            match self.store.get(&handle.key).await? {
                None => ABSENT,
                Some(entry) => {
                    let owner = LockRecord::decode(&entry.value, self.default_lease_seconds)
                        .map(|record| record.holder_token);
                    if owner.as_deref() != Some(holder_token) {
                        warn!(
                            key = handle.key(),
                            holder = holder_token,
                            owner = owner.as_deref().unwrap_or("<unknown>"),
                            "could not continue lock: held by someone else"
                        );
                        return Ok(false);
                    }
                    entry.version
                }
            }
        };

        let value = self.fresh_record(holder_token, lease_seconds)?;
        match self.store.put_if_version(&handle.key, value, expected).await? {
            CasOutcome::Written(version) => {
                handle.last_known_version = version;
                info!(key = handle.key(), holder = holder_token, version, "continued");
                Ok(true)
            }
            CasOutcome::VersionConflict => {
                handle.release();
                warn!(
                    key = handle.key(),
                    holder = holder_token,
                    expected,
                    "could not continue lock: lock lost"
                );
                Ok(false)
            }
        }
    }

    /// Inspect the record at `key` against `now`. Never writes.
    pub async fn can_break(&self, key: &str, now: Timestamp) -> Result<BreakDecision> {
        let Some(entry) = self.store.get(key).await? else {
            return Ok(BreakDecision::NoRecord);
        };

        let Some(record) = LockRecord::decode(&entry.value, self.default_lease_seconds) else {
            warn!(key, version = entry.version, "value is not a lock record, breakable");
            return Ok(BreakDecision::BreakAllowed(entry.version));
        };

        if record.is_expired(now) {
            info!(
                key,
                holder = %record.holder_token,
                expired_at = %record.expires_at(),
                "lease expired, breakable"
            );
            Ok(BreakDecision::BreakAllowed(entry.version))
        } else {
            info!(
                key,
                holder = %record.holder_token,
                remaining_ms = record.time_remaining(now).num_milliseconds(),
                "lease not yet expired"
            );
            Ok(BreakDecision::NotExpiredYet)
        }
    }

    /// Overwrite the record at the handle's key with our own.
    ///
    /// Without `forced` this only happens once the current lease is over.
    /// With `forced` the lease is ignored. Either way the write is
    /// conditional on the version just read, so of several concurrent
    /// breakers at most one wins.
    pub async fn break_lock(
        &self,
        handle: &mut LockHandle,
        holder_token: &str,
        lease_seconds: u64,
        forced: bool,
    ) -> Result<bool> {
        let expected = if forced {
            self.store
                .get(&handle.key)
                .await?
                .map_or(ABSENT, |entry| entry.version)
        } else {
            match self.can_break(&handle.key, self.clock.now()).await? {
                BreakDecision::BreakAllowed(version) => version,
                BreakDecision::NoRecord => ABSENT,
                BreakDecision::NotExpiredYet => {
                    info!(key = handle.key(), holder = holder_token, "could not break lock: lease still running");
                    return Ok(false);
                }
            }
        };

        let value = self.fresh_record(holder_token, lease_seconds)?;
        match self.store.put_if_version(&handle.key, value, expected).await? {
            CasOutcome::Written(version) => {
                handle.last_known_version = version;
                info!(key = handle.key(), holder = holder_token, forced, version, "broke lock");
                Ok(true)
            }
            CasOutcome::VersionConflict => {
                warn!(
                    key = handle.key(),
                    holder = holder_token,
                    forced,
                    expected,
                    "could not break lock: record changed concurrently"
                );
                Ok(false)
            }
        }
    }

    /// Delete our record.
    ///
    /// The handle ends up free whether or not the delete matched: on a
    /// conflict the lock already belongs to someone else.
    pub async fn unlock(&self, handle: &mut LockHandle, holder_token: &str) -> Result<bool> {
        if !handle.is_held() {
            error!(key = handle.key(), holder = holder_token, "could not unlock: handle holds nothing");
            return Ok(false);
        }

        let expected = handle.last_known_version;
        let outcome = self.store.delete_if_version(&handle.key, expected).await?;
        handle.release();
        match outcome {
            DeleteOutcome::Deleted => {
                info!(key = handle.key(), holder = holder_token, version = expected, "unlocked");
                Ok(true)
            }
            DeleteOutcome::VersionConflict => {
                warn!(
                    key = handle.key(),
                    holder = holder_token,
                    version = expected,
                    "could not unlock: lock was taken over"
                );
                Ok(false)
            }
        }
    }
}

//! The value stored at a lock key.

use crate::time::{from_unix_seconds, to_unix_seconds, Timestamp};
use crate::Result;
use bytes::Bytes;
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Who holds a lock and until when.
#[derive(Debug, Clone, PartialEq)]
pub struct LockRecord {
    pub holder_token: String,
    pub acquired_at: Timestamp,
    pub lease_seconds: u64,
}

/// JSON shape shared with every other client of the same keys:
/// `{"id": ..., "start_time": <unix seconds>, "timeout": <seconds>}`.
#[derive(Debug, Serialize, Deserialize)]
struct WireRecord {
    #[serde(default)]
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    start_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout: Option<u64>,
}

impl LockRecord {
    pub fn new(holder_token: impl Into<String>, acquired_at: Timestamp, lease_seconds: u64) -> Self {
        Self {
            holder_token: holder_token.into(),
            acquired_at,
            lease_seconds,
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        let wire = WireRecord {
            id: self.holder_token.clone(),
            start_time: Some(to_unix_seconds(&self.acquired_at)),
            timeout: Some(self.lease_seconds),
        };
        Ok(Bytes::from(serde_json::to_vec(&wire)?))
    }

    /// Decodes a stored value.
    ///
    /// Returns `None` for values that carry no start time or are not lock
    /// records at all; such keys have no lease that could still be running.
    /// A record without a `timeout` gets `default_lease_seconds`.
    pub fn decode(value: &[u8], default_lease_seconds: u64) -> Option<Self> {
        let wire: WireRecord = serde_json::from_slice(value).ok()?;
        let acquired_at = from_unix_seconds(wire.start_time?)?;
        Some(Self {
            holder_token: wire.id,
            acquired_at,
            lease_seconds: wire.timeout.unwrap_or(default_lease_seconds),
        })
    }

    pub fn expires_at(&self) -> Timestamp {
        let lease = i64::try_from(self.lease_seconds)
            .unwrap_or(i64::MAX)
            .min(i64::MAX / 1000);
        self.acquired_at
            .checked_add_signed(Duration::seconds(lease))
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC)
    }

    /// The lease is over once `now` reaches `acquired_at + lease_seconds`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at()
    }

    pub fn time_remaining(&self, now: Timestamp) -> Duration {
        let expiry = self.expires_at();
        if now < expiry {
            expiry.signed_duration_since(now)
        } else {
            Duration::zero()
        }
    }
}

use crate::{
    store::{CasOutcome, DeleteOutcome, InMemoryKvStore, KvEntry, KvStore, Version},
    Error, Result,
};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::{sync::Arc, time::Duration};
use tokio::{sync::Barrier, time::sleep};

const SIMULATED_ENDPOINT: &str = "simulated";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultMode {
    #[default]
    Healthy,
    /// Requests never reach the store.
    Partitioned,
    /// Requests are applied but every answer is lost.
    LoseResponses,
}

/// Wraps a store with call counting, latency and injected failures.
#[derive(Debug)]
pub struct SimulatedStore {
    inner: Arc<dyn KvStore>,
    latency: Duration,
    mode: Mutex<FaultMode>,
    calls: AtomicUsize,
    read_barrier: Option<Arc<Barrier>>,
}

impl SimulatedStore {
    pub fn new(inner: Arc<dyn KvStore>) -> Self {
        Self {
            inner,
            latency: Duration::ZERO,
            mode: Mutex::new(FaultMode::Healthy),
            calls: AtomicUsize::new(0),
            read_barrier: None,
        }
    }

    /// Fresh in-memory store behind the simulator.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryKvStore::new()))
    }

    /// Delay applied before each request reaches the store. Widens the
    /// window between a read and the write that depends on it.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Every `get` answers only once `readers` reads have reached the store,
    /// so all of them observe the same state before any of them writes.
    /// Reads arrive in groups of `readers`; a lone read after that waits forever.
    pub fn with_read_barrier(mut self, readers: usize) -> Self {
        self.read_barrier = Some(Arc::new(Barrier::new(readers)));
        self
    }

    pub fn set_mode(&self, mode: FaultMode) {
        *self.mode.lock() = mode;
    }

    pub fn partition(&self) {
        self.set_mode(FaultMode::Partitioned);
    }

    pub fn heal(&self) {
        self.set_mode(FaultMode::Healthy);
    }

    /// Number of requests issued so far, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> Result<FaultMode> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
        let mode = *self.mode.lock();
        if mode == FaultMode::Partitioned {
            return Err(Error::unavailable(SIMULATED_ENDPOINT, "network partition"));
        }
        Ok(mode)
    }

    fn leave<T>(mode: FaultMode, result: Result<T>) -> Result<T> {
        match mode {
            FaultMode::LoseResponses => {
                Err(Error::unavailable(SIMULATED_ENDPOINT, "response lost"))
            }
            _ => result,
        }
    }
}

#[async_trait]
impl KvStore for SimulatedStore {
    async fn get(&self, key: &str) -> Result<Option<KvEntry>> {
        let mode = self.enter().await?;
        let result = self.inner.get(key).await;
        if let Some(barrier) = &self.read_barrier {
            barrier.wait().await;
        }
        Self::leave(mode, result)
    }

    async fn put_if_version(
        &self,
        key: &str,
        value: Bytes,
        expected: Version,
    ) -> Result<CasOutcome> {
        let mode = self.enter().await?;
        Self::leave(mode, self.inner.put_if_version(key, value, expected).await)
    }

    async fn delete_if_version(&self, key: &str, expected: Version) -> Result<DeleteOutcome> {
        let mode = self.enter().await?;
        Self::leave(mode, self.inner.delete_if_version(key, expected).await)
    }
}

//! Choice among equivalent store replicas.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Picks which endpoint serves the next request.
///
/// `count` is always non-zero; the result must be below it.
pub trait EndpointSelector: Send + Sync + std::fmt::Debug {
    fn select(&self, count: usize) -> usize;
}

/// Uniformly random replica per call.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSelector;

impl EndpointSelector for RandomSelector {
    fn select(&self, count: usize) -> usize {
        rand::thread_rng().gen_range(0..count)
    }
}

#[derive(Debug, Default)]
pub struct RoundRobinSelector {
    next: AtomicUsize,
}

impl EndpointSelector for RoundRobinSelector {
    fn select(&self, count: usize) -> usize {
        self.next.fetch_add(1, Ordering::Relaxed) % count
    }
}

/// Always the same replica; falls back to the first if out of range.
#[derive(Debug, Default, Clone, Copy)]
pub struct StickySelector {
    pub index: usize,
}

impl EndpointSelector for StickySelector {
    fn select(&self, count: usize) -> usize {
        if self.index < count {
            self.index
        } else {
            0
        }
    }
}

/// Selector names accepted in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorKind {
    #[default]
    Random,
    RoundRobin,
    Sticky,
}

impl SelectorKind {
    pub fn build(self) -> Arc<dyn EndpointSelector> {
        match self {
            Self::Random => Arc::new(RandomSelector),
            Self::RoundRobin => Arc::new(RoundRobinSelector::default()),
            Self::Sticky => Arc::new(StickySelector::default()),
        }
    }
}

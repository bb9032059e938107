#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod endpoint;
pub mod error;
pub mod lock;
pub mod logging;
pub mod record;
pub mod store;
pub mod time;

pub mod test_utils;

pub use config::LockConfig;
pub use error::{Error, Result};
pub use lock::{generate_holder_token, BreakDecision, LeaseLock, LockHandle};
pub use record::LockRecord;
pub use store::{KvStore, Version};

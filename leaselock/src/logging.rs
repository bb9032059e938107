//! tracing subscriber setup for binaries embedding the lock.

use crate::config::LockConfig;
use crate::{Error, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Overrides `log_level` when set, using `EnvFilter` directive syntax.
pub const LOG_ENV: &str = "LEASELOCK_LOG";

pub fn init(config: &LockConfig) -> Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| Error::InvalidConfig(format!("log level {:?}: {e}", config.log_level)))?;

    let registry = Registry::default().with(filter);
    let installed = if config.log_json {
        registry.with(fmt::layer().json().with_target(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };
    installed.map_err(|e| Error::Other(anyhow::anyhow!("tracing subscriber: {e}")))
}

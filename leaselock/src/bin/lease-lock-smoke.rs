//! Exercises the full lock lifecycle against live Consul agents.
//!
//! Configuration comes from `LEASELOCK_CONFIG` (a TOML file) and the usual
//! `LEASELOCK_*` variables. `LEASELOCK_SMOKE_KEY` names the key to use.

use anyhow::{ensure, Context};
use leaselock::{generate_holder_token, logging, LeaseLock, LockConfig, LockHandle};
use std::{env, path::PathBuf};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = env::var("LEASELOCK_CONFIG").ok().map(PathBuf::from);
    let config = LockConfig::load(config_path.as_deref()).context("loading lock config")?;
    logging::init(&config)?;

    let key = env::var("LEASELOCK_SMOKE_KEY").unwrap_or_else(|_| "some-lock".to_string());
    let lease = config.lease_seconds;
    let holder = generate_holder_token();
    let lock = LeaseLock::from_config(&config)?;
    let mut handle = LockHandle::new(key.as_str());

    info!(%key, %holder, endpoints = ?config.endpoints, "going to lock");
    let locked = lock.lock(&mut handle, &holder, lease).await?;
    info!(%key, locked, "lock attempt finished");

    if !locked {
        info!(%key, "going to force-break a lock left by someone else");
        let broken = lock.break_lock(&mut handle, &holder, lease, true).await?;
        ensure!(broken, "forced break of {key} failed");
    }

    info!(%key, "locking a held handle, this must fail");
    ensure!(
        !lock.lock(&mut handle, &holder, lease).await?,
        "second lock on the same handle succeeded"
    );

    info!(%key, "renewing");
    ensure!(lock.continue_lock(&mut handle, &holder, lease).await?, "renewal failed");

    info!(%key, "unlocking");
    ensure!(lock.unlock(&mut handle, &holder).await?, "unlock failed");

    info!(%key, "locking again");
    ensure!(lock.lock(&mut handle, &holder, lease).await?, "relock failed");

    info!(%key, "force-breaking our own lock");
    ensure!(
        lock.break_lock(&mut handle, &holder, lease, true).await?,
        "forced break failed"
    );

    info!(%key, "unlocking");
    ensure!(lock.unlock(&mut handle, &holder).await?, "final unlock failed");

    info!(%key, "smoke sequence passed");
    Ok(())
}

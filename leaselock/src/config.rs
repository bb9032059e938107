//! Lock configuration.
//!
//! Sources are merged in order, later ones winning:
//! 1. `LockConfig::default()`
//! 2. a TOML file, if given and present
//! 3. `LEASELOCK_*` environment variables (e.g. `LEASELOCK_LEASE_SECONDS=30`)

use crate::endpoint::SelectorKind;
use crate::lock::DEFAULT_LEASE_SECONDS;
use crate::{Error, Result};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

pub const ENV_PREFIX: &str = "LEASELOCK_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Consul agent base URLs; one is picked per request.
    pub endpoints: Vec<String>,
    pub request_timeout_secs: u64,
    pub lease_seconds: u64,
    pub selector: SelectorKind,
    pub acl_token: Option<String>,
    pub log_level: String,
    pub log_json: bool,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["http://localhost:8500".to_string()],
            request_timeout_secs: 10,
            lease_seconds: DEFAULT_LEASE_SECONDS,
            selector: SelectorKind::Random,
            acl_token: None,
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl LockConfig {
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(LockConfig::default()));
        if let Some(path) = path {
            if path.exists() {
                debug!(path = %path.display(), "loading lock config file");
                figment = figment.merge(Toml::file(path));
            } else {
                debug!(path = %path.display(), "lock config file not found, skipping");
            }
        }
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config: LockConfig = Self::figment(path).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoints.is_empty() {
            return Err(Error::NoEndpoints);
        }
        if let Some(bad) = self
            .endpoints
            .iter()
            .find(|e| !(e.starts_with("http://") || e.starts_with("https://")))
        {
            return Err(Error::InvalidConfig(format!(
                "endpoint {bad:?} must be an http(s) URL"
            )));
        }
        if self.lease_seconds == 0 {
            return Err(Error::InvalidConfig("lease_seconds must be positive".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "request_timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_are_valid() {
        let config = LockConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.lease_seconds, 10);
    }

    #[test]
    fn test_file_then_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "lock.toml",
                r#"
                endpoints = ["http://consul-1:8500", "http://consul-2:8500"]
                lease_seconds = 30
                selector = "round_robin"
                "#,
            )?;
            jail.set_env("LEASELOCK_LEASE_SECONDS", "45");

            let config = LockConfig::load(Some(Path::new("lock.toml"))).unwrap();
            assert_eq!(config.endpoints.len(), 2);
            assert_eq!(config.lease_seconds, 45);
            assert_eq!(config.selector, SelectorKind::RoundRobin);
            assert_eq!(config.request_timeout_secs, 10);
            Ok(())
        });
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = LockConfig::default();
        config.endpoints.clear();
        assert!(matches!(config.validate(), Err(Error::NoEndpoints)));

        let config = LockConfig {
            endpoints: vec!["localhost:8500".into()],
            ..LockConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = LockConfig {
            lease_seconds: 0,
            ..LockConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Store unavailable at {endpoint}: {reason}")]
    StoreUnavailable { endpoint: String, reason: String },

    #[error("Invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },

    #[error("Invalid key: {0:?}")]
    InvalidKey(String),

    #[error("No store endpoints configured")]
    NoEndpoints,

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn unavailable(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        Self::StoreUnavailable {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    /// True when the outcome of the request is unknown to the caller,
    /// including replies that break the wire contract.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable { .. } | Self::InvalidResponse { .. } | Self::NoEndpoints
        )
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_outcomes() {
        assert!(Error::unavailable("http://a", "timed out").is_store_unavailable());
        assert!(Error::InvalidResponse {
            endpoint: "http://a".into(),
            reason: "maybe".into(),
        }
        .is_store_unavailable());
        assert!(!Error::InvalidKey("..".into()).is_store_unavailable());
        assert!(!Error::InvalidConfig("lease".into()).is_store_unavailable());
    }
}

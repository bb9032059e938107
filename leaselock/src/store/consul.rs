//! Consul KV over HTTP.
//!
//! Reads return `[{"Value": <base64>, "ModifyIndex": n}]` or 404. Writes and
//! deletes take `?cas=<index>` and answer with a bare `true` or `false`.

use super::{CasOutcome, DeleteOutcome, KvEntry, KvStore, Version};
use crate::endpoint::{EndpointSelector, RandomSelector};
use crate::{Error, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const ACL_TOKEN_HEADER: &str = "X-Consul-Token";

#[derive(Debug, Deserialize)]
struct ConsulEntry {
    #[serde(rename = "Value", default)]
    value: Option<String>,
    #[serde(rename = "ModifyIndex")]
    modify_index: u64,
}

#[derive(Debug, Clone)]
pub struct ConsulKvStore {
    client: Client,
    endpoints: Vec<String>,
    selector: Arc<dyn EndpointSelector>,
    timeout: Duration,
    acl_token: Option<String>,
}

impl ConsulKvStore {
    /// `endpoints` are agent base URLs such as `http://localhost:8500`.
    pub fn new(endpoints: Vec<String>) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(Error::NoEndpoints);
        }
        let endpoints: Vec<String> = endpoints
            .into_iter()
            .map(|e| e.trim_end_matches('/').to_string())
            .collect();
        for endpoint in &endpoints {
            Self::base_url(endpoint)?;
        }
        let client = Client::builder()
            .build()
            .map_err(|e| Error::InvalidConfig(format!("http client: {e}")))?;
        Ok(Self {
            client,
            endpoints,
            selector: Arc::new(RandomSelector),
            timeout: Duration::from_secs(10),
            acl_token: None,
        })
    }

    pub fn with_selector(mut self, selector: Arc<dyn EndpointSelector>) -> Self {
        self.selector = selector;
        self
    }

    /// Applies to every request, including the read that confirms a write.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_acl_token(mut self, token: impl Into<String>) -> Self {
        self.acl_token = Some(token.into());
        self
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    fn pick_endpoint(&self) -> &str {
        let idx = self.selector.select(self.endpoints.len());
        &self.endpoints[idx.min(self.endpoints.len() - 1)]
    }

    fn base_url(endpoint: &str) -> Result<Url> {
        let url = Url::parse(endpoint)
            .map_err(|e| Error::InvalidConfig(format!("endpoint {endpoint:?}: {e}")))?;
        if url.cannot_be_a_base() {
            return Err(Error::InvalidConfig(format!(
                "endpoint {endpoint:?} cannot carry a path"
            )));
        }
        Ok(url)
    }

    /// The whole key becomes a single percent-encoded path segment, so `/`,
    /// `?`, `#` and `%` reach Consul as part of the key. `.` and `..` would
    /// be dropped as dot segments and are refused instead.
    fn key_url(endpoint: &str, key: &str) -> Result<Url> {
        if key.is_empty() || key == "." || key == ".." {
            return Err(Error::InvalidKey(key.to_string()));
        }
        let mut url = Self::base_url(endpoint)?;
        url.path_segments_mut()
            .map_err(|()| {
                Error::InvalidConfig(format!("endpoint {endpoint:?} cannot carry a path"))
            })?
            .pop_if_empty()
            .extend(["v1", "kv"])
            .push(key);
        Ok(url)
    }

    fn prepare(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.timeout(self.timeout);
        match &self.acl_token {
            Some(token) => request.header(ACL_TOKEN_HEADER, token),
            None => request,
        }
    }

    async fn send(&self, endpoint: &str, request: RequestBuilder) -> Result<reqwest::Response> {
        self.prepare(request).send().await.map_err(|e| {
            if e.is_timeout() {
                Error::unavailable(endpoint, format!("timed out after {:?}", self.timeout))
            } else {
                Error::unavailable(endpoint, e)
            }
        })
    }

    /// Reads a `true`/`false` answer to a conditional write or delete.
    async fn cas_answer(&self, endpoint: &str, response: reqwest::Response) -> Result<bool> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::unavailable(endpoint, e))?;
        if !status.is_success() {
            return Err(Error::unavailable(
                endpoint,
                format!("status {status}: {}", body.trim()),
            ));
        }
        match body.trim() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(Error::InvalidResponse {
                endpoint: endpoint.to_string(),
                reason: format!("expected true or false, got {other:?}"),
            }),
        }
    }
}

#[async_trait]
impl KvStore for ConsulKvStore {
    async fn get(&self, key: &str) -> Result<Option<KvEntry>> {
        let endpoint = self.pick_endpoint();
        let url = Self::key_url(endpoint, key)?;
        debug!(%url, "consul get");

        let response = self.send(endpoint, self.client.get(url)).await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::unavailable(
                endpoint,
                format!("status {status}: {}", body.trim()),
            ));
        }

        let entries: Vec<ConsulEntry> = response.json().await.map_err(|e| Error::InvalidResponse {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;
        let Some(entry) = entries.into_iter().next() else {
            return Ok(None);
        };

        let value = match entry.value {
            Some(encoded) => STANDARD.decode(encoded).map_err(|e| Error::InvalidResponse {
                endpoint: endpoint.to_string(),
                reason: format!("value is not base64: {e}"),
            })?,
            None => Vec::new(),
        };
        Ok(Some(KvEntry {
            value: Bytes::from(value),
            version: entry.modify_index,
        }))
    }

    async fn put_if_version(
        &self,
        key: &str,
        value: Bytes,
        expected: Version,
    ) -> Result<CasOutcome> {
        let endpoint = self.pick_endpoint();
        let url = Self::key_url(endpoint, key)?;
        debug!(%url, cas = expected, "consul put");

        let request = self
            .client
            .put(url)
            .query(&[("cas", expected)])
            .body(value.clone());
        let response = self.send(endpoint, request).await?;
        if !self.cas_answer(endpoint, response).await? {
            return Ok(CasOutcome::VersionConflict);
        }

        // Consul does not return the new index; read it back and make sure
        // the stored bytes are still ours.
        match self.get(key).await? {
            Some(entry) if entry.value == value => Ok(CasOutcome::Written(entry.version)),
            Some(entry) => {
                warn!(key, version = entry.version, "write superseded before it could be confirmed");
                Ok(CasOutcome::VersionConflict)
            }
            None => {
                warn!(key, "key deleted before write could be confirmed");
                Ok(CasOutcome::VersionConflict)
            }
        }
    }

    async fn delete_if_version(&self, key: &str, expected: Version) -> Result<DeleteOutcome> {
        let endpoint = self.pick_endpoint();
        let url = Self::key_url(endpoint, key)?;
        debug!(%url, cas = expected, "consul delete");

        let request = self.client.delete(url).query(&[("cas", expected)]);
        let response = self.send(endpoint, request).await?;
        if self.cas_answer(endpoint, response).await? {
            Ok(DeleteOutcome::Deleted)
        } else {
            Ok(DeleteOutcome::VersionConflict)
        }
    }
}

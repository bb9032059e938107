//! A stand-in Consul agent serving the KV endpoints from an in-memory store.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use leaselock::store::{CasOutcome, DeleteOutcome, InMemoryKvStore, KvStore};
use serde::Deserialize;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;

#[derive(Clone)]
struct AgentState {
    store: Arc<InMemoryKvStore>,
    acl_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CasQuery {
    cas: Option<u64>,
}

impl AgentState {
    fn authorized(&self, headers: &HeaderMap) -> bool {
        match &self.acl_token {
            None => true,
            Some(expected) => headers
                .get("X-Consul-Token")
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v == expected),
        }
    }
}

fn answer(ok: bool) -> Response {
    (StatusCode::OK, if ok { "true" } else { "false" }).into_response()
}

async fn get_key(
    State(state): State<AgentState>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !state.authorized(&headers) {
        return (StatusCode::FORBIDDEN, "ACL not found").into_response();
    }
    match state.store.get(&key).await {
        Ok(Some(entry)) => Json(serde_json::json!([{
            "Key": key,
            "Flags": 0,
            "Value": STANDARD.encode(&entry.value),
            "CreateIndex": entry.version,
            "ModifyIndex": entry.version,
            "LockIndex": 0,
        }]))
        .into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn put_key(
    State(state): State<AgentState>,
    Path(key): Path<String>,
    Query(query): Query<CasQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !state.authorized(&headers) {
        return (StatusCode::FORBIDDEN, "ACL not found").into_response();
    }
    let Some(cas) = query.cas else {
        return (StatusCode::BAD_REQUEST, "only cas writes are served").into_response();
    };
    match state.store.put_if_version(&key, body, cas).await {
        Ok(CasOutcome::Written(_)) => answer(true),
        Ok(CasOutcome::VersionConflict) => answer(false),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn delete_key(
    State(state): State<AgentState>,
    Path(key): Path<String>,
    Query(query): Query<CasQuery>,
    headers: HeaderMap,
) -> Response {
    if !state.authorized(&headers) {
        return (StatusCode::FORBIDDEN, "ACL not found").into_response();
    }
    let Some(cas) = query.cas else {
        return (StatusCode::BAD_REQUEST, "only cas deletes are served").into_response();
    };
    match state.store.delete_if_version(&key, cas).await {
        Ok(DeleteOutcome::Deleted) => answer(true),
        Ok(DeleteOutcome::VersionConflict) => answer(false),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Starts an agent over `store` and returns its base URL.
pub async fn spawn_agent(store: Arc<InMemoryKvStore>, acl_token: Option<&str>) -> String {
    let state = AgentState {
        store,
        acl_token: acl_token.map(str::to_string),
    };
    let app = Router::new()
        .route("/v1/kv/*key", get(get_key).put(put_key).delete(delete_key))
        .with_state(state);
    serve(app).await
}

/// An agent that answers every request with a 500.
pub async fn spawn_broken_agent() -> String {
    let app = Router::new().fallback(|| async {
        (StatusCode::INTERNAL_SERVER_ERROR, "No cluster leader")
    });
    serve(app).await
}

/// An agent that sits on every request for `delay` before failing it.
pub async fn spawn_slow_agent(delay: Duration) -> String {
    let app = Router::new().fallback(move || async move {
        tokio::time::sleep(delay).await;
        (StatusCode::INTERNAL_SERVER_ERROR, "too late")
    });
    serve(app).await
}

/// An agent that answers every request with `200` and `body`.
pub async fn spawn_agent_answering(body: &'static str) -> String {
    let app = Router::new().fallback(move || async move { (StatusCode::OK, body) });
    serve(app).await
}

/// A URL nothing listens on.
pub async fn unreachable_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

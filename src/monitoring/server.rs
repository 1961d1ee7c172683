// Copyright (c) 2026 Marketmesh
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! `/metrics` (Prometheus text format) and `/healthz` (supervisor status as
//! JSON), the ambient HTTP surface every component gets regardless of the
//! product-feature Non-goals.

use super::metrics::Metrics;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use chrono::{DateTime, Utc};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Coarse supervisor status surfaced at `/healthz`.
#[derive(Clone, Debug, serde::Serialize)]
pub struct HealthStatus {
    /// Whether every startup step has completed and no step has failed.
    pub ready: bool,
    /// Most recent fatal error, if any.
    pub last_error: Option<String>,
    /// Process start time.
    pub start_time: DateTime<Utc>,
    /// Last time this status was refreshed.
    pub updated_at: DateTime<Utc>,
    /// Build version string (from `vergen`).
    pub version: String,
}

impl HealthStatus {
    /// A not-yet-ready status stamped with `now`.
    pub fn starting(now: DateTime<Utc>, version: String) -> Self {
        Self { ready: false, last_error: None, start_time: now, updated_at: now, version }
    }
}

#[derive(Clone)]
struct AppState {
    metrics: Arc<Metrics>,
    health: Arc<RwLock<HealthStatus>>,
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let families = state.metrics.registry.gather();
    let mut buf = Vec::new();
    if TextEncoder::new().encode(&families, &mut buf).is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "encode error".to_string());
    }
    (StatusCode::OK, String::from_utf8_lossy(&buf).into_owned())
}

async fn healthz_handler(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.health.read().await.clone();
    let code = if status.ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, axum::Json(status))
}

/// Bind `addr` and serve `/metrics` + `/healthz` until the returned task is
/// aborted (the supervisor's shutdown broadcast does not reach this worker
/// directly; callers abort its `JoinHandle` on shutdown).
pub async fn spawn_http_server(
    addr: std::net::SocketAddr,
    metrics: Arc<Metrics>,
    health: Arc<RwLock<HealthStatus>>,
) -> std::io::Result<tokio::task::JoinHandle<()>> {
    let state = AppState { metrics, health };
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::warn!(?e, "monitoring http server exited");
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn healthz_reflects_ready_flag() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let health = Arc::new(RwLock::new(HealthStatus::starting(Utc::now(), "test".into())));
        let addr: std::net::SocketAddr = "127.0.0.1:0".parse().unwrap();
        let handle = spawn_http_server(addr, metrics, health.clone()).await.unwrap();
        health.write().await.ready = true;
        assert!(health.read().await.ready);
        handle.abort();
    }
}

// Copyright 2025 Canale Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Operational HTTP surface.
//!
//! One listener with two routes:
//!
//! - `GET /healthz` always answers 200 while the process is alive; the body
//!   reports each monitored dependency as `UP` or `DOWN`
//! - `GET /metrics` renders the installed Prometheus recorder
//!
//! A recovery middleware turns handler panics into a JSON 500. Panicking
//! with [`AbortHandler`] is re-raised instead, which drops the connection
//! without writing a response.

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderValue, Response, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use canale_core::monitor::NamedMonitor;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tower_http::catch_panic::{CatchPanicLayer, ResponseForPanic};
use tracing::{error, info, warn};

/// Panic payload recognised by the recovery middleware; re-raised so the
/// server drops the connection without a body.
#[derive(Debug)]
pub struct AbortHandler;

/// Errors produced by the HTTP surface.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener address is not bindable
    #[error("could not bind server address {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The server stopped with an error
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
enum HealthStatus {
    #[serde(rename = "UP")]
    Up,
    #[serde(rename = "DOWN")]
    Down,
}

#[derive(Debug, Serialize)]
struct MonitoredComponent {
    status: HealthStatus,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: HealthStatus,
    components: BTreeMap<String, MonitoredComponent>,
}

#[derive(Clone)]
struct AppState {
    monitors: Arc<[Arc<dyn NamedMonitor>]>,
    metrics: PrometheusHandle,
}

/// The operational HTTP server.
pub struct Server {
    addr: String,
    monitors: Vec<Arc<dyn NamedMonitor>>,
    metrics: PrometheusHandle,
}

impl Server {
    /// Creates a server reporting the given probes on `/healthz`.
    pub fn new(
        addr: impl Into<String>,
        monitors: Vec<Arc<dyn NamedMonitor>>,
        metrics: PrometheusHandle,
    ) -> Self {
        Self {
            addr: addr.into(),
            monitors,
            metrics,
        }
    }

    /// Serves until the shutdown signal fires.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] when the address is unavailable and
    /// [`ServerError::Serve`] when the listener fails afterwards.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ServerError> {
        let state = AppState {
            monitors: self.monitors.into(),
            metrics: self.metrics,
        };

        let app = Router::new()
            .route("/healthz", get(healthz))
            .route("/metrics", get(render_metrics))
            .layer(CatchPanicLayer::custom(JsonPanicResponder))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind(&self.addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.addr.clone(),
                source,
            })?;

        info!(addr = %self.addr, "server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await
            .map_err(ServerError::Serve)?;

        info!(addr = %self.addr, "server gracefully shut down");
        Ok(())
    }
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health_response(&state.monitors).await)
}

async fn render_metrics(State(state): State<AppState>) -> String {
    state.metrics.render()
}

/// Probes every dependency; the outer status stays `UP` as long as the
/// process can answer at all.
async fn health_response(monitors: &[Arc<dyn NamedMonitor>]) -> HealthResponse {
    let mut components = BTreeMap::new();
    for monitor in monitors {
        let status = match monitor.monitor().await {
            Ok(()) => HealthStatus::Up,
            Err(error) => {
                warn!(component = monitor.name(), %error, "dependency is down");
                HealthStatus::Down
            }
        };
        components.insert(monitor.name().to_string(), MonitoredComponent { status });
    }

    HealthResponse {
        status: HealthStatus::Up,
        components,
    }
}

#[derive(Clone, Copy)]
struct JsonPanicResponder;

impl ResponseForPanic for JsonPanicResponder {
    type ResponseBody = Body;

    fn response_for_panic(
        &mut self,
        err: Box<dyn Any + Send + 'static>,
    ) -> Response<Self::ResponseBody> {
        if err.downcast_ref::<AbortHandler>().is_some() {
            std::panic::resume_unwind(err);
        }

        let detail = if let Some(message) = err.downcast_ref::<String>() {
            message.clone()
        } else if let Some(message) = err.downcast_ref::<&str>() {
            (*message).to_string()
        } else {
            "unknown panic".to_string()
        };
        error!(panic = %detail, "handler panicked");

        let mut response = Response::new(Body::from(
            r#"{"error":{"message":"internal server error"}}"#,
        ));
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use canale_core::monitor::MonitorError;

    struct StubMonitor {
        name: &'static str,
        healthy: bool,
    }

    #[async_trait]
    impl NamedMonitor for StubMonitor {
        fn name(&self) -> &str {
            self.name
        }

        async fn monitor(&self) -> Result<(), MonitorError> {
            if self.healthy {
                Ok(())
            } else {
                Err(MonitorError::new("connection refused"))
            }
        }
    }

    #[tokio::test]
    async fn test_health_response_maps_probe_results() {
        let monitors: Vec<Arc<dyn NamedMonitor>> = vec![
            Arc::new(StubMonitor {
                name: "mongo",
                healthy: true,
            }),
            Arc::new(StubMonitor {
                name: "nats",
                healthy: false,
            }),
        ];

        let response = health_response(&monitors).await;

        assert_eq!(response.status, HealthStatus::Up);
        assert_eq!(response.components["mongo"].status, HealthStatus::Up);
        assert_eq!(response.components["nats"].status, HealthStatus::Down);
    }

    #[tokio::test]
    async fn test_health_response_overall_status_stays_up() {
        let monitors: Vec<Arc<dyn NamedMonitor>> = vec![Arc::new(StubMonitor {
            name: "mongo",
            healthy: false,
        })];

        let response = health_response(&monitors).await;
        assert_eq!(response.status, HealthStatus::Up);
    }

    #[tokio::test]
    async fn test_health_response_serialises_like_the_contract() {
        let monitors: Vec<Arc<dyn NamedMonitor>> = vec![Arc::new(StubMonitor {
            name: "mongo",
            healthy: true,
        })];

        let body = serde_json::to_value(health_response(&monitors).await).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "status": "UP",
                "components": { "mongo": { "status": "UP" } },
            })
        );
    }

    #[test]
    fn test_panic_responder_produces_json_500() {
        let mut responder = JsonPanicResponder;
        let response = responder.response_for_panic(Box::new("boom"));

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE),
            Some(&HeaderValue::from_static("application/json"))
        );
    }
}

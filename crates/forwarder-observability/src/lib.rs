//! Observability (health/metrics) abstractions and Axum routes

use chrono::{DateTime, Utc};
use forwarder_streaming::{ForwarderStats, LoopState, StatsSnapshot};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Up,
    Down,
    Degraded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub message: Option<String>,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwarderMetrics {
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub batches_polled: u64,
    pub batches_committed: u64,
    pub messages_forwarded: u64,
    pub messages_skipped: u64,
    pub fatal_errors: u64,
    pub last_commit: Option<DateTime<Utc>>,
}

#[async_trait::async_trait]
pub trait HealthMonitor: Send + Sync + 'static {
    async fn get_overall_health(&self) -> HealthStatus;
    async fn run_health_checks(&self) -> Vec<HealthCheck>;
    async fn get_metrics(&self) -> ForwarderMetrics;
}

/// Health of a forwarding loop, read from its shared statistics
pub struct ForwarderHealth {
    stats: Arc<ForwarderStats>,
}

impl ForwarderHealth {
    pub fn new(stats: Arc<ForwarderStats>) -> Self {
        Self { stats }
    }

    fn status_of(snapshot: &StatsSnapshot) -> HealthStatus {
        match snapshot.state {
            LoopState::Running => HealthStatus::Up,
            LoopState::Draining => HealthStatus::Degraded,
            LoopState::Stopped => HealthStatus::Down,
        }
    }
}

#[async_trait::async_trait]
impl HealthMonitor for ForwarderHealth {
    async fn get_overall_health(&self) -> HealthStatus {
        Self::status_of(&self.stats.snapshot())
    }

    async fn run_health_checks(&self) -> Vec<HealthCheck> {
        let started = Instant::now();
        let snapshot = self.stats.snapshot();
        let status = Self::status_of(&snapshot);

        let message = match (&status, snapshot.fatal_errors) {
            (HealthStatus::Down, 0) => Some("forwarder is not running".to_string()),
            (HealthStatus::Down, _) => Some("forwarder stopped after a fatal error".to_string()),
            (HealthStatus::Degraded, _) => Some("shutdown in progress".to_string()),
            (HealthStatus::Up, _) => None,
        };

        vec![HealthCheck {
            name: "forwarding_loop".to_string(),
            status,
            timestamp: Utc::now(),
            duration_ms: started.elapsed().as_millis() as u64,
            message,
            details: serde_json::to_value(&snapshot).ok(),
        }]
    }

    async fn get_metrics(&self) -> ForwarderMetrics {
        let snapshot = self.stats.snapshot();
        let now = Utc::now();

        ForwarderMetrics {
            timestamp: now,
            uptime_seconds: (now - snapshot.started_at).num_seconds().max(0) as u64,
            batches_polled: snapshot.batches_polled,
            batches_committed: snapshot.batches_committed,
            messages_forwarded: snapshot.messages_forwarded,
            messages_skipped: snapshot.messages_skipped,
            fatal_errors: snapshot.fatal_errors,
            last_commit: snapshot.last_commit,
        }
    }
}

pub mod routes {
    use super::*;
    use axum::{
        extract::State,
        http::StatusCode,
        response::{IntoResponse, Json},
        routing::get,
        Router,
    };
    use std::net::SocketAddr;

    pub fn monitoring_routes(monitor: Arc<dyn HealthMonitor>) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/health/detailed", get(health_detailed))
            .route("/metrics", get(metrics))
            .with_state(monitor)
    }

    /// Serve the monitoring routes until the listener fails
    pub async fn serve(addr: SocketAddr, monitor: Arc<dyn HealthMonitor>) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Serving health endpoints on {}", addr);
        axum::serve(listener, monitoring_routes(monitor)).await
    }

    async fn health(State(m): State<Arc<dyn HealthMonitor>>) -> impl IntoResponse {
        let status = m.get_overall_health().await;
        let status_code = match status {
            HealthStatus::Up => StatusCode::OK,
            HealthStatus::Degraded => StatusCode::OK,
            HealthStatus::Down => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status_code, Json(status))
    }

    async fn health_detailed(State(m): State<Arc<dyn HealthMonitor>>) -> impl IntoResponse {
        let checks = m.run_health_checks().await;
        Json(checks)
    }

    async fn metrics(State(m): State<Arc<dyn HealthMonitor>>) -> impl IntoResponse {
        let s = m.get_metrics().await;
        Json(s)
    }
}

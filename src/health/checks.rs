use std::collections::HashMap;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::state::AppState;

/// Pending webhook events above which the ingress reports itself degraded
const PENDING_DEGRADED_THRESHOLD: usize = 10_000;

/// Overall health state of a component or the entire system
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Component is functioning normally
    Healthy,
    /// Component has issues but is still functional
    Degraded,
    /// Component is not functional
    Unhealthy,
}

/// Health status for an individual component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthState,
    pub message: Option<String>,
    pub last_check: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
    pub check_duration_ms: Option<u64>,
}

impl ComponentHealth {
    fn with_state(status: HealthState, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Some(message.into()),
            last_check: Utc::now(),
            metadata: None,
            check_duration_ms: None,
        }
    }

    pub fn healthy(message: impl Into<String>) -> Self {
        Self::with_state(HealthState::Healthy, message)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with_state(HealthState::Degraded, message)
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_state(HealthState::Unhealthy, message)
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.check_duration_ms = Some(duration.as_millis() as u64);
        self
    }
}

/// Complete health status including all components
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: HealthState,
    pub version: String,
    pub uptime_seconds: u64,
    pub timestamp: DateTime<Utc>,
    /// Monitor strategy feeding the relay
    pub monitor: String,
    /// Last persisted cursor, if any
    pub cursor: Option<serde_json::Value>,
    pub checks: HashMap<String, ComponentHealth>,
}

/// Health of the relay: state store reachability and, in push mode, the
/// size of the pending set
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, StatusCode> {
    let mut checks = HashMap::new();

    let store_start = Instant::now();
    let (store_health, cursor) = check_state_store(&state).await;
    checks.insert(
        "state_store".to_string(),
        store_health.with_duration(store_start.elapsed()),
    );

    if state.ingress.is_some() {
        let ingress_start = Instant::now();
        checks.insert(
            "ingress".to_string(),
            check_ingress(&state)
                .await
                .with_duration(ingress_start.elapsed()),
        );
    }

    let health_status = HealthStatus {
        status: determine_overall_health(&checks),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime().as_secs(),
        timestamp: Utc::now(),
        monitor: state.monitor_kind.to_string(),
        cursor,
        checks,
    };

    debug!(overall_status = ?health_status.status, "Health check completed");

    match health_status.status {
        HealthState::Healthy => Ok(Json(health_status)),
        HealthState::Degraded => {
            warn!("Relay is in degraded state but still operational");
            Ok(Json(health_status))
        }
        HealthState::Unhealthy => {
            error!("Relay health check failed - returning 503 Service Unavailable");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

async fn check_state_store(state: &AppState) -> (ComponentHealth, Option<serde_json::Value>) {
    match state.store.load(&state.monitor_key).await {
        Ok(Some(cursor)) => {
            let cursor = serde_json::to_value(&cursor).ok();
            (
                ComponentHealth::healthy("State store is readable"),
                cursor,
            )
        }
        Ok(None) => (
            ComponentHealth::healthy("State store is readable, no cursor persisted yet"),
            None,
        ),
        Err(e) => (
            ComponentHealth::unhealthy(format!("State store is not readable: {e:#}")),
            None,
        ),
    }
}

async fn check_ingress(state: &AppState) -> ComponentHealth {
    let Some(ingress) = &state.ingress else {
        return ComponentHealth::healthy("Ingress disabled");
    };

    let pending = ingress.pending().len().await;
    let metadata = serde_json::json!({ "pending_events": pending });

    if pending > PENDING_DEGRADED_THRESHOLD {
        ComponentHealth::degraded(format!("{pending} webhook events waiting to be drained"))
            .with_metadata(metadata)
    } else {
        ComponentHealth::healthy("Ingress is accepting events").with_metadata(metadata)
    }
}

fn determine_overall_health(checks: &HashMap<String, ComponentHealth>) -> HealthState {
    if checks
        .values()
        .any(|check| check.status == HealthState::Unhealthy)
    {
        HealthState::Unhealthy
    } else if checks
        .values()
        .any(|check| check.status == HealthState::Degraded)
    {
        HealthState::Degraded
    } else {
        HealthState::Healthy
    }
}

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use crate::events::EventLog;
use crate::ports::LedgerStore;

pub const LEDGER: &str = "ledger";
pub const EVENT_LOG: &str = "event_log";

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: HashMap<String, DependencyStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyStatus {
    Healthy { status: String, latency_ms: u64 },
    Unhealthy { status: String, error: String },
}

impl DependencyStatus {
    fn from_result<E: std::fmt::Display>(start: Instant, result: Result<(), E>) -> Self {
        match result {
            Ok(()) => DependencyStatus::Healthy {
                status: "healthy".to_string(),
                latency_ms: start.elapsed().as_millis() as u64,
            },
            Err(e) => DependencyStatus::Unhealthy {
                status: "unhealthy".to_string(),
                error: e.to_string(),
            },
        }
    }
}

#[async_trait]
pub trait DependencyChecker: Send + Sync {
    async fn check(&self) -> DependencyStatus;
}

pub struct LedgerChecker {
    store: Arc<dyn LedgerStore>,
}

impl LedgerChecker {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DependencyChecker for LedgerChecker {
    async fn check(&self) -> DependencyStatus {
        let start = Instant::now();
        DependencyStatus::from_result(start, self.store.ping().await)
    }
}

pub struct EventLogChecker {
    log: Arc<dyn EventLog>,
}

impl EventLogChecker {
    pub fn new(log: Arc<dyn EventLog>) -> Self {
        Self { log }
    }
}

#[async_trait]
impl DependencyChecker for EventLogChecker {
    async fn check(&self) -> DependencyStatus {
        let start = Instant::now();
        DependencyStatus::from_result(start, self.log.ping().await)
    }
}

pub async fn check_health(
    ledger: LedgerChecker,
    event_log: EventLogChecker,
    start_time: Instant,
) -> HealthResponse {
    let timeout_duration = Duration::from_secs(5);

    let (ledger_result, event_log_result) = tokio::join!(
        timeout(timeout_duration, ledger.check()),
        timeout(timeout_duration, event_log.check()),
    );

    let mut dependencies = HashMap::new();
    for (name, result) in [(LEDGER, ledger_result), (EVENT_LOG, event_log_result)] {
        dependencies.insert(
            name.to_string(),
            result.unwrap_or_else(|_| DependencyStatus::Unhealthy {
                status: "unhealthy".to_string(),
                error: "timeout".to_string(),
            }),
        );
    }

    HealthResponse {
        status: determine_overall_status(&dependencies),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: start_time.elapsed().as_secs(),
        dependencies,
    }
}

/// The ledger is critical: intake cannot validate without it. A broken event
/// log only delays relaying, so it degrades rather than fails the service.
pub fn determine_overall_status(dependencies: &HashMap<String, DependencyStatus>) -> String {
    let critical_deps = [LEDGER];
    let mut has_critical_failure = false;
    let mut has_non_critical_failure = false;

    for (name, status) in dependencies {
        if matches!(status, DependencyStatus::Unhealthy { .. }) {
            if critical_deps.contains(&name.as_str()) {
                has_critical_failure = true;
            } else {
                has_non_critical_failure = true;
            }
        }
    }

    if has_critical_failure {
        "unhealthy".to_string()
    } else if has_non_critical_failure {
        "degraded".to_string()
    } else {
        "healthy".to_string()
    }
}

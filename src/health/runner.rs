use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::probe::{Probe, ProbeError, ProbeResult};
use crate::observability::Metrics;
use crate::store::{ComponentStatus, Details, StatusLog};

/// Default per-probe timeout
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

/// Aggregated verdict of one probe run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverallHealth {
    pub status: HealthState,
    pub checks: BTreeMap<String, ProbeResult>,
    pub timestamp: DateTime<Utc>,
}

impl OverallHealth {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }
}

/// Runs the configured probes concurrently, each under its own timeout
pub struct ProbeRunner {
    probes: Vec<Arc<dyn Probe>>,
    timeout: Duration,
    status_log: Option<StatusLog>,
    metrics: Arc<Metrics>,
}

impl ProbeRunner {
    pub fn new(probes: Vec<Arc<dyn Probe>>, timeout: Duration, metrics: Arc<Metrics>) -> Self {
        Self {
            probes,
            timeout,
            status_log: None,
            metrics,
        }
    }

    /// Also append each outcome to `status_log`
    pub fn with_status_log(mut self, status_log: StatusLog) -> Self {
        self.status_log = Some(status_log);
        self
    }

    pub fn probe_names(&self) -> Vec<&'static str> {
        self.probes.iter().map(|probe| probe.name()).collect()
    }

    /// Run every probe on its own task
    ///
    /// A probe that errors, times out or panics yields an unhealthy result
    /// for its own check only.
    pub async fn run(&self) -> OverallHealth {
        self.metrics.health_check_run();

        let handles: Vec<_> = self
            .probes
            .iter()
            .map(|probe| tokio::spawn(check_with_timeout(Arc::clone(probe), self.timeout)))
            .collect();
        let joined = join_all(handles).await;

        let mut checks = BTreeMap::new();
        let mut all_healthy = true;
        for (probe, joined) in self.probes.iter().zip(joined) {
            let outcome = joined.unwrap_or_else(|join_error| Err(ProbeError::Aborted(join_error.to_string())));
            let result = self.settle(probe.as_ref(), outcome);
            all_healthy &= result.healthy;
            checks.insert(probe.name().to_string(), result);
        }

        let status = if all_healthy {
            HealthState::Healthy
        } else {
            HealthState::Unhealthy
        };
        debug!(?status, probes = checks.len(), "Health check completed");

        OverallHealth {
            status,
            checks,
            timestamp: Utc::now(),
        }
    }

    fn settle(&self, probe: &dyn Probe, outcome: Result<ProbeResult, ProbeError>) -> ProbeResult {
        let result = match outcome {
            Ok(result) => result,
            Err(error) => {
                warn!(probe = probe.name(), %error, "Probe failed");
                ProbeResult::from_error(probe.label(), &error)
            }
        };

        if !result.healthy {
            self.metrics.probe_failed();
        }
        self.record(probe.name(), &result);
        result
    }

    fn record(&self, component: &str, result: &ProbeResult) {
        let Some(status_log) = &self.status_log else {
            return;
        };

        let status = if result.healthy {
            ComponentStatus::Healthy
        } else {
            ComponentStatus::Error
        };
        let mut details = Details::new();
        details.insert("source".into(), "health_check".into());

        if let Err(error) = status_log.record(component, status, &result.message, details) {
            warn!(component, %error, "Failed to record probe outcome");
        }
    }
}

async fn check_with_timeout(probe: Arc<dyn Probe>, timeout: Duration) -> Result<ProbeResult, ProbeError> {
    match tokio::time::timeout(timeout, probe.check()).await {
        Ok(outcome) => outcome,
        Err(_) => Err(ProbeError::Timeout(timeout)),
    }
}

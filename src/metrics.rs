//! Prometheus metrics for the reconcile loop

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

use crate::crd::{ContainerStorageModule, CsmState};
use crate::error::{Error, Result};

const ALL_STATES: [CsmState; 6] = [
    CsmState::Succeeded,
    CsmState::Running,
    CsmState::Updating,
    CsmState::Failed,
    CsmState::InvalidConfig,
    CsmState::Error,
];

/// Operator metrics, registered in their own registry
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    reconciles: IntCounterVec,
    errors: IntCounterVec,
    state: IntGaugeVec,
    duration: Histogram,
}

fn register_err(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics registration failed: {}", e))
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let reconciles = IntCounterVec::new(
            Opts::new("csm_reconcile_total", "Reconcile passes by driver"),
            &["driver"],
        )
        .map_err(register_err)?;
        let errors = IntCounterVec::new(
            Opts::new("csm_reconcile_errors_total", "Failed reconcile passes by reason"),
            &["driver", "reason"],
        )
        .map_err(register_err)?;
        let state = IntGaugeVec::new(
            Opts::new("csm_state", "Current state of each ContainerStorageModule (1 = active state)"),
            &["namespace", "name", "driver", "state"],
        )
        .map_err(register_err)?;
        let duration = Histogram::with_opts(HistogramOpts::new(
            "csm_reconcile_duration_seconds",
            "Duration of reconcile passes",
        ))
        .map_err(register_err)?;

        registry.register(Box::new(reconciles.clone())).map_err(register_err)?;
        registry.register(Box::new(errors.clone())).map_err(register_err)?;
        registry.register(Box::new(state.clone())).map_err(register_err)?;
        registry.register(Box::new(duration.clone())).map_err(register_err)?;

        Ok(Self {
            registry,
            reconciles,
            errors,
            state,
            duration,
        })
    }

    pub fn reconcile(&self, cr: &ContainerStorageModule) {
        self.reconciles
            .with_label_values(&[cr.driver_type().config_name()])
            .inc();
    }

    pub fn reconcile_failure(&self, cr: &ContainerStorageModule, err: &Error) {
        self.errors
            .with_label_values(&[cr.driver_type().config_name(), err.metric_label()])
            .inc();
    }

    pub fn observe_duration(&self, seconds: f64) {
        self.duration.observe(seconds);
    }

    /// Mark `state` as the only active state of a CR
    pub fn set_state(&self, cr: &ContainerStorageModule, state: CsmState) {
        let namespace = cr.namespace_or_default();
        let driver = cr.driver_type().config_name();
        for candidate in ALL_STATES {
            let label = candidate.to_string();
            self.state
                .with_label_values(&[namespace.as_str(), cr.name(), driver, label.as_str()])
                .set(i64::from(candidate == state));
        }
    }

    /// Drop every series of a deleted CR
    pub fn forget(&self, cr: &ContainerStorageModule) {
        let namespace = cr.namespace_or_default();
        let driver = cr.driver_type().config_name();
        for candidate in ALL_STATES {
            let label = candidate.to_string();
            let _ = self
                .state
                .remove_label_values(&[namespace.as_str(), cr.name(), driver, label.as_str()]);
        }
    }

    /// Text exposition of every registered metric
    pub fn encode(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| Error::Internal(format!("metrics encoding failed: {}", e)))?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

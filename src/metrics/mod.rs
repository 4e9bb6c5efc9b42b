//! Prometheus metrics for connection attempts, admission and membership.
//!
//! Collectors are process-wide. Call [`init_metrics`] once at startup to add
//! them to [`REGISTRY`], then scrape with [`encode_text`].


use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::Encoder;
use prometheus::IntCounterVec;
use prometheus::IntGauge;
use prometheus::Opts;
use prometheus::Registry;
use prometheus::TextEncoder;
use tracing::warn;

use crate::Error;
use crate::Result;

lazy_static! {
    /// Outbound attempts by outcome: connected, timeout, refused,
    /// network_failure, protocol_violation
    pub static ref CONNECT_ATTEMPTS: IntCounterVec = IntCounterVec::new(
        Opts::new("connect_attempts", "Outbound connection attempts by outcome"),
        &["outcome"]
    )
    .expect("metric can not be created");

    /// Inbound handshakes by result: admitted, declined, protocol_violation,
    /// handshake_timeout, aborted, overloaded
    pub static ref ADMISSION_EVENTS: IntCounterVec = IntCounterVec::new(
        Opts::new("admission_events", "Inbound handshake results"),
        &["event"]
    )
    .expect("metric can not be created");

    pub static ref INFLIGHT_HANDSHAKES: IntGauge = IntGauge::new(
        "inflight_handshakes",
        "Inbound handshakes currently holding a slot"
    )
    .expect("metric can not be created");

    pub static ref MEMBERSHIP_GENERATION: IntGauge = IntGauge::new(
        "membership_generation",
        "Generation of the latest published membership view"
    )
    .expect("metric can not be created");

    /// Liveness probes by result: ok, failed
    pub static ref PROBE_RESULTS: IntCounterVec = IntCounterVec::new(
        Opts::new("probe_results", "Liveness probe results"),
        &["result"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

static INIT: Once = Once::new();

/// Adds every collector of this crate to `registry`.
pub fn register_custom_metrics(registry: &Registry) -> Result<()> {
    registry
        .register(Box::new(CONNECT_ATTEMPTS.clone()))
        .map_err(metric_error)?;
    registry
        .register(Box::new(ADMISSION_EVENTS.clone()))
        .map_err(metric_error)?;
    registry
        .register(Box::new(INFLIGHT_HANDSHAKES.clone()))
        .map_err(metric_error)?;
    registry
        .register(Box::new(MEMBERSHIP_GENERATION.clone()))
        .map_err(metric_error)?;
    registry
        .register(Box::new(PROBE_RESULTS.clone()))
        .map_err(metric_error)?;
    Ok(())
}

/// Registers the collectors with [`REGISTRY`]; later calls are no-ops.
pub fn init_metrics() {
    INIT.call_once(|| {
        if let Err(e) = register_custom_metrics(&REGISTRY) {
            warn!(error = %e, "could not register metrics");
        }
    });
}

/// Renders [`REGISTRY`] in the Prometheus text exposition format.
pub fn encode_text() -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&REGISTRY.gather(), &mut buffer)
        .map_err(metric_error)?;
    String::from_utf8(buffer).map_err(|e| Error::Fatal(format!("metrics are not utf-8: {e}")))
}

fn metric_error(e: prometheus::Error) -> Error {
    Error::Fatal(format!("metrics: {e}"))
}

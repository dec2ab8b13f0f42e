// src/metrics.rs
use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Fails if one is already installed.
    pub fn init() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        ensure_metrics_described();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("meter_polls_total", "Successful meter polls.");
        describe_counter!("meter_errors_total", "Meter polls that failed (transport or parse).");
        describe_histogram!("meter_request_ms", "Meter HTTP round trip in milliseconds.");
        describe_counter!("rollup_errors_total", "Rollup passes with at least one failed signal.");
        describe_counter!("store_sync_errors_total", "Failed store file syncs.");
        describe_gauge!("energy_power_watts", "Current power per signal in watts.");
        describe_gauge!(
            "energy_aggregate_last_run_ts",
            "Unix ts when readings were last pushed into the recorders."
        );
    });
}

// tests/metrics_endpoint.rs
//
// Installs the global Prometheus recorder, so it stays the only test in this
// binary.

use std::sync::Arc;

use axum::body::{self, Body};
use http::{Request, StatusCode};
use energy_monitor::clock::SystemClock;
use energy_monitor::energy::Energy;
use energy_monitor::meter::{Measure, ShellyMeter, ShellyModel};
use energy_monitor::metrics::Metrics;
use energy_monitor::scheduler::{aggregate_once, spawn_meter_poller, MeterRole};
use tokio::sync::watch;
use tower::ServiceExt as _;

#[tokio::test]
async fn metrics_endpoint_exposes_energy_series() {
    let metrics = Metrics::init().expect("install recorder");

    let energy = Arc::new(Energy::in_memory(&[], Arc::new(SystemClock)));
    energy.record_provider(Measure::single(800));
    let (tx, _rx) = watch::channel(energy.snapshot());
    aggregate_once(&energy, &tx);

    let bad = Arc::new(ShellyMeter::from_fixture("pv", ShellyModel::Shelly1pro, "{}"));
    let poller = spawn_meter_poller(
        bad,
        MeterRole::Pv,
        energy.clone(),
        std::time::Duration::from_millis(10),
    );
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    poller.abort();

    let req = Request::builder()
        .uri("/metrics")
        .body(Body::empty())
        .unwrap();
    let resp = metrics.router().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let bytes = body::to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("energy_power_watts"), "{text}");
    assert!(text.contains(r#"signal="provider""#), "{text}");
    assert!(text.contains("meter_errors_total"), "{text}");
    assert!(text.contains("energy_aggregate_last_run_ts"), "{text}");
}

// src/scheduler.rs
//! Background tasks: one poller per meter, the aggregation tick that feeds the
//! recorders and publishes snapshots, and the rollup tick.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use metrics::{counter, gauge};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::MissedTickBehavior,
};

use crate::{
    energy::{Energy, EnergySnapshot},
    meter::{Measure, Meter},
    metrics::ensure_metrics_described,
};

/// Which reading a meter supplies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MeterRole {
    Provider,
    Pv,
}

impl MeterRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MeterRole::Provider => "provider",
            MeterRole::Pv => "pv",
        }
    }
}

/// Poll `meter` once and hand the reading to `energy`.
pub async fn poll_once(meter: &dyn Meter, role: MeterRole, energy: &Energy) -> Result<Measure> {
    let measure = meter.measure().await?;
    match role {
        MeterRole::Provider => energy.record_provider(measure),
        MeterRole::Pv => energy.record_pv(measure),
    }
    Ok(measure)
}

/// Poll a meter forever. Failures are logged and the previous reading stays
/// in place until the next successful poll.
pub fn spawn_meter_poller(
    meter: Arc<dyn Meter>,
    role: MeterRole,
    energy: Arc<Energy>,
    every: Duration,
) -> JoinHandle<()> {
    ensure_metrics_described();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match poll_once(meter.as_ref(), role, &energy).await {
                Ok(m) => {
                    counter!("meter_polls_total", "meter" => role.as_str()).increment(1);
                    tracing::trace!(meter = meter.name(), total = m.total, "meter polled");
                }
                Err(e) => {
                    counter!("meter_errors_total", "meter" => role.as_str()).increment(1);
                    tracing::warn!(meter = meter.name(), role = role.as_str(), error = ?e, "meter poll failed");
                }
            }
        }
    })
}

/// Push current readings into the recorders and publish a fresh snapshot.
pub fn aggregate_once(energy: &Energy, tx: &watch::Sender<EnergySnapshot>) {
    energy.ingest();
    let snapshot = energy.snapshot();

    for s in &snapshot.signals {
        gauge!("energy_power_watts", "signal" => s.signal.name()).set(s.current as f64);
    }
    gauge!("energy_aggregate_last_run_ts").set(snapshot.taken_at.timestamp() as f64);

    tx.send_replace(snapshot);
}

pub fn spawn_aggregation_loop(
    energy: Arc<Energy>,
    every: Duration,
    tx: watch::Sender<EnergySnapshot>,
) -> JoinHandle<()> {
    ensure_metrics_described();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            aggregate_once(&energy, &tx);
        }
    })
}

/// Feed the rollups every `every`. The first pass runs one period after start
/// so the 1-minute window has data.
pub fn spawn_rollup_loop(energy: Arc<Energy>, every: Duration) -> JoinHandle<()> {
    ensure_metrics_described();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = energy.measure_rollups() {
                counter!("rollup_errors_total").increment(1);
                tracing::warn!(error = ?e, "rollup pass failed");
            } else {
                tracing::debug!("rollup pass done");
            }
        }
    })
}

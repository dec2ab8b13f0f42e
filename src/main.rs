//! Energy monitor binary entrypoint.
//! Polls the grid and PV meters, keeps the smoothed and rolled-up power
//! figures, and serves them over HTTP.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use energy_monitor::{
    api::{self, AppState},
    clock::{Clock, SystemClock},
    config::{EnergyConfig, MeterConfig},
    energy::Energy,
    meter::{Meter, ShellyMeter},
    metrics::Metrics,
    scheduler::{self, MeterRole},
};

/// Compact logs by default; `ENERGY_LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("energy_monitor=info,warn"));

    let json = std::env::var("ENERGY_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

fn http_meter(role: MeterRole, cfg: &MeterConfig) -> Result<Arc<dyn Meter>> {
    let meter = ShellyMeter::http(role.as_str(), &cfg.addr, cfg.model, cfg.timeout())
        .with_context(|| format!("setting up {} meter", role.as_str()))?;
    tracing::info!(meter = role.as_str(), model = %cfg.model, url = ?meter.url(), "meter configured");
    Ok(Arc::new(meter))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = ?e, "ctrl-c handler failed");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = EnergyConfig::load_default().context("loading energy config")?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let energy = Arc::new(Energy::open(&cfg, clock)?);

    let metrics = if cfg.metrics {
        Some(Metrics::init()?)
    } else {
        None
    };

    let provider = http_meter(MeterRole::Provider, &cfg.provider_meter)?;
    let pv = http_meter(MeterRole::Pv, &cfg.pv_meter)?;

    let (tx, rx) = watch::channel(energy.snapshot());

    let mut tasks = vec![
        scheduler::spawn_meter_poller(
            provider,
            MeterRole::Provider,
            energy.clone(),
            cfg.provider_meter.poll_interval(),
        ),
        scheduler::spawn_meter_poller(pv, MeterRole::Pv, energy.clone(), cfg.pv_meter.poll_interval()),
        scheduler::spawn_aggregation_loop(energy.clone(), cfg.aggregate_interval(), tx),
        scheduler::spawn_rollup_loop(energy.clone(), cfg.rollup_interval()),
    ];
    tasks.extend(energy.spawn_store_sync());

    let mut app = api::router(AppState::new(rx));
    if let Some(m) = &metrics {
        app = app.merge(m.router());
    }

    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr)
        .await
        .with_context(|| format!("binding {}", cfg.listen_addr))?;
    tracing::info!(
        addr = %cfg.listen_addr,
        data_dir = %cfg.data_dir.display(),
        signals = energy.signals().count(),
        "energy monitor listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;

    for task in &tasks {
        task.abort();
    }
    energy.flush().await.context("final store flush")?;
    tracing::info!("stores flushed, bye");
    Ok(())
}

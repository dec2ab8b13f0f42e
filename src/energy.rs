//! # Energy
//! Latest meter readings, the derived signals, and one recorder + rollup per
//! signal.
//!
//! Derived signals:
//! - consumption = provider + pv
//! - surplus = max(0, -provider)
//! - effective pv = max(0, pv - surplus)
//!
//! A meter that has not reported yet counts as 0 W.

use std::{collections::BTreeMap, fmt, sync::Arc};

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Serialize, Serializer};
use tokio::task::JoinHandle;

use crate::{
    clock::Clock,
    config::EnergyConfig,
    meter::{Channel, Measure},
    recorder::{SlidingWindowRecorder, DEFAULT_HORIZON_MINUTES},
    rollup::{HierarchicalRollup, RollupStores},
    store::SimpleDb,
};

/// Window fed into the rollups.
pub const ROLLUP_WINDOW_SECS: u32 = 60;

/// Per-channel signals only answer 1-minute windows.
pub const DEFAULT_CHANNEL_HORIZON_MINUTES: i64 = 20;

/// A smoothing window reported for a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub label: &'static str,
    pub secs: u32,
}

const W5S: Window = Window { label: "5s", secs: 5 };
const W1M: Window = Window { label: "1m", secs: 60 };
const W3M: Window = Window { label: "3m", secs: 180 };
const W5M: Window = Window { label: "5m", secs: 300 };

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Signal {
    /// Grid connection point; negative while exporting.
    Provider,
    Pv,
    PvEffective,
    Consumption,
    Surplus,
    PvChannel(Channel),
}

impl Signal {
    pub const CORE: [Signal; 5] = [
        Signal::Provider,
        Signal::Pv,
        Signal::PvEffective,
        Signal::Consumption,
        Signal::Surplus,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Signal::Provider => "provider",
            Signal::Pv => "pv",
            Signal::PvEffective => "pv_effective",
            Signal::Consumption => "consumption",
            Signal::Surplus => "surplus",
            Signal::PvChannel(Channel::A) => "pv_channel_a",
            Signal::PvChannel(Channel::B) => "pv_channel_b",
            Signal::PvChannel(Channel::C) => "pv_channel_c",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::CORE
            .into_iter()
            .chain(Channel::ALL.into_iter().map(Signal::PvChannel))
            .find(|s| s.name() == name)
    }

    /// Smoothing windows reported for this signal.
    pub fn windows(self) -> &'static [Window] {
        match self {
            Signal::Provider | Signal::Pv | Signal::Consumption => &[W1M, W3M],
            Signal::Surplus => &[W5S, W1M, W3M, W5M],
            Signal::PvEffective | Signal::PvChannel(_) => &[W1M],
        }
    }
}

/// Core signals followed by the requested PV channels, deduplicated.
fn signal_set(pv_channels: &[Channel]) -> Vec<Signal> {
    let mut channels = pv_channels.to_vec();
    channels.sort();
    channels.dedup();
    Signal::CORE
        .into_iter()
        .chain(channels.into_iter().map(Signal::PvChannel))
        .collect()
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Signal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

pub fn consumption_power(provider: i64, pv: i64) -> i64 {
    provider + pv
}

pub fn surplus_power(provider: i64) -> i64 {
    (-provider).max(0)
}

pub fn effective_pv_power(pv: i64, provider: i64) -> i64 {
    (pv - surplus_power(provider)).max(0)
}

/// A meter reading and when it arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Reading {
    pub measure: Measure,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Readings {
    provider: Option<Reading>,
    pv: Option<Reading>,
}

impl Readings {
    fn value_of(&self, signal: Signal) -> i64 {
        let provider = self.provider.map_or(0, |r| r.measure.total);
        let pv = self.pv.map_or(0, |r| r.measure.total);
        match signal {
            Signal::Provider => provider,
            Signal::Pv => pv,
            Signal::PvEffective => effective_pv_power(pv, provider),
            Signal::Consumption => consumption_power(provider, pv),
            Signal::Surplus => surplus_power(provider),
            Signal::PvChannel(c) => self.pv.and_then(|r| r.measure.channel(c)).unwrap_or(0),
        }
    }
}

#[derive(Debug)]
pub struct SignalAggregate {
    pub signal: Signal,
    pub recorder: SlidingWindowRecorder,
    pub rollup: HierarchicalRollup,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignalSnapshot {
    pub signal: Signal,
    pub current: i64,
    /// Window label ("5s", "1m", …) → time-weighted average watts.
    pub smoothed: BTreeMap<&'static str, i64>,
    pub current_hour: i64,
    pub current_day: i64,
    pub current_year: i64,
    pub estimated_year: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnergySnapshot {
    pub taken_at: DateTime<Utc>,
    pub provider: Option<Reading>,
    pub pv: Option<Reading>,
    pub signals: Vec<SignalSnapshot>,
}

impl EnergySnapshot {
    pub fn signal(&self, signal: Signal) -> Option<&SignalSnapshot> {
        self.signals.iter().find(|s| s.signal == signal)
    }
}

#[derive(Debug)]
pub struct Energy {
    clock: Arc<dyn Clock>,
    aggregates: Vec<SignalAggregate>,
    readings: RwLock<Readings>,
    stores: Vec<Arc<SimpleDb>>,
}

impl Energy {
    /// Open persistent rollups for every configured signal under `cfg.data_dir`.
    pub fn open(cfg: &EnergyConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let tiers = signal_set(&cfg.pv_meter.channels)
            .into_iter()
            .map(|signal| {
                RollupStores::open(signal.name(), &cfg.data_dir, clock.clone())
                    .map(|stores| (signal, stores))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::assemble(
            clock,
            tiers,
            Duration::minutes(i64::from(cfg.horizon_minutes)),
            Duration::minutes(i64::from(cfg.channel_horizon_minutes)),
        ))
    }

    /// Non-persistent instance with default horizons.
    pub fn in_memory(pv_channels: &[Channel], clock: Arc<dyn Clock>) -> Self {
        let tiers = signal_set(pv_channels)
            .into_iter()
            .map(|signal| (signal, RollupStores::in_memory(signal.name(), clock.clone())))
            .collect();
        Self::assemble(
            clock,
            tiers,
            Duration::minutes(DEFAULT_HORIZON_MINUTES),
            Duration::minutes(DEFAULT_CHANNEL_HORIZON_MINUTES),
        )
    }

    fn assemble(
        clock: Arc<dyn Clock>,
        tiers: Vec<(Signal, RollupStores)>,
        horizon: Duration,
        channel_horizon: Duration,
    ) -> Self {
        let mut aggregates = Vec::with_capacity(tiers.len());
        let mut stores = Vec::with_capacity(tiers.len() * 3);
        for (signal, tier) in tiers {
            stores.extend(tier.all());
            let horizon = match signal {
                Signal::PvChannel(_) => channel_horizon,
                _ => horizon,
            };
            aggregates.push(SignalAggregate {
                signal,
                recorder: SlidingWindowRecorder::with_horizon(horizon, clock.clone()),
                rollup: HierarchicalRollup::from_stores(signal.name(), &tier, clock.clone()),
            });
        }

        Self {
            clock,
            aggregates,
            readings: RwLock::new(Readings::default()),
            stores,
        }
    }

    pub fn signals(&self) -> impl Iterator<Item = Signal> + '_ {
        self.aggregates.iter().map(|a| a.signal)
    }

    pub fn aggregate(&self, signal: Signal) -> Option<&SignalAggregate> {
        self.aggregates.iter().find(|a| a.signal == signal)
    }

    pub fn record_provider(&self, measure: Measure) {
        let at = self.clock.now();
        self.readings.write().provider = Some(Reading { measure, at });
    }

    /// PV meters cannot produce negative power; standby draw is clamped to 0.
    pub fn record_pv(&self, measure: Measure) {
        let clamp = |v: Option<i64>| v.map(|w| w.max(0));
        let measure = Measure {
            total: measure.total.max(0),
            channel_a: clamp(measure.channel_a),
            channel_b: clamp(measure.channel_b),
            channel_c: clamp(measure.channel_c),
        };
        let at = self.clock.now();
        self.readings.write().pv = Some(Reading { measure, at });
    }

    /// Current value of `signal` from the latest readings.
    pub fn current(&self, signal: Signal) -> i64 {
        self.readings.read().value_of(signal)
    }

    /// Push the current value of every signal into its recorder.
    pub fn ingest(&self) {
        let now = self.clock.now();
        let readings = *self.readings.read();
        for agg in &self.aggregates {
            agg.recorder.put_at(readings.value_of(agg.signal), now);
        }
    }

    /// Feed each signal's trailing 1-minute average into its rollup.
    /// Negative averages (provider while exporting) are stored as 0.
    ///
    /// A failing signal does not stop the others; the error names every
    /// signal that failed.
    pub fn measure_rollups(&self) -> Result<()> {
        let mut failed = Vec::new();
        for agg in &self.aggregates {
            let power_1m = agg.recorder.windowed_average(ROLLUP_WINDOW_SECS);
            if let Err(e) = agg.rollup.measure(power_1m) {
                tracing::debug!(signal = %agg.signal, error = ?e, "rollup measure failed");
                failed.push(format!("{}: {e:#}", agg.signal));
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            bail!("rollup failed for {}", failed.join("; "))
        }
    }

    pub fn snapshot(&self) -> EnergySnapshot {
        let readings = *self.readings.read();
        let signals = self
            .aggregates
            .iter()
            .map(|agg| SignalSnapshot {
                signal: agg.signal,
                current: readings.value_of(agg.signal),
                smoothed: agg
                    .signal
                    .windows()
                    .iter()
                    .map(|w| (w.label, agg.recorder.windowed_average(w.secs)))
                    .collect(),
                current_hour: agg.rollup.power_current_hour(),
                current_day: agg.rollup.power_current_day(),
                current_year: agg.rollup.power_current_year(),
                estimated_year: agg.rollup.power_estimated_year(),
            })
            .collect();

        EnergySnapshot {
            taken_at: self.clock.now(),
            provider: readings.provider,
            pv: readings.pv,
            signals,
        }
    }

    /// Start the periodic file sync of every rollup store.
    pub fn spawn_store_sync(&self) -> Vec<JoinHandle<()>> {
        self.stores
            .iter()
            .cloned()
            .map(SimpleDb::spawn_sync_task)
            .collect()
    }

    /// Flush every dirty store now (used on shutdown).
    pub async fn flush(&self) -> Result<()> {
        let mut failed = Vec::new();
        for store in &self.stores {
            if let Err(e) = store.flush().await {
                failed.push(format!("{}: {e:#}", store.name()));
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            bail!("flushing stores failed: {}", failed.join("; "))
        }
    }
}

//! # Hierarchical Rollup
//! Minute → hour → day → year aggregates of one signal, kept in three TTL
//! stores so they survive restarts.
//!
//! Convention: every bucket holds average watts. Hour and day values are
//! accumulations on that same scale (no minutes/60 conversion); dashboards
//! read them as watt-hour-like totals.
//!
//! Policy for the running day: sum of the hour buckets from midnight through
//! the current hour (UTC). Later hours are not summed because yesterday's
//! hour buckets are still alive under the 25 h TTL.

use std::{path::Path, sync::Arc, time::Duration as StdDuration};

use anyhow::{Context, Result};
use parking_lot::RwLock;

use crate::{
    buckets::{self, DAYS_PER_YEAR, MINUTES_PER_HOUR},
    clock::Clock,
    store::{KvStore, SimpleDb},
};

const MINUTE_SYNC: StdDuration = StdDuration::from_secs(60);
const HOUR_SYNC: StdDuration = StdDuration::from_secs(70);
const DAY_SYNC: StdDuration = StdDuration::from_secs(80);

/// The three persistent tiers of one signal.
#[derive(Debug, Clone)]
pub struct RollupStores {
    pub per_minute: Arc<SimpleDb>,
    pub per_hour: Arc<SimpleDb>,
    pub per_day: Arc<SimpleDb>,
}

impl RollupStores {
    /// Open `<signal>_per_minute|hour|day.json` under `dir`.
    pub fn open(signal: &str, dir: &Path, clock: Arc<dyn Clock>) -> Result<Self> {
        let open = |tier: &str, period| {
            SimpleDb::open(&format!("{signal}_per_{tier}"), dir, period, clock.clone())
                .map(Arc::new)
        };
        Ok(Self {
            per_minute: open("minute", MINUTE_SYNC)?,
            per_hour: open("hour", HOUR_SYNC)?,
            per_day: open("day", DAY_SYNC)?,
        })
    }

    pub fn in_memory(signal: &str, clock: Arc<dyn Clock>) -> Self {
        let mem = |tier: &str| Arc::new(SimpleDb::in_memory(&format!("{signal}_per_{tier}"), clock.clone()));
        Self {
            per_minute: mem("minute"),
            per_hour: mem("hour"),
            per_day: mem("day"),
        }
    }

    pub fn all(&self) -> [Arc<SimpleDb>; 3] {
        [
            self.per_minute.clone(),
            self.per_hour.clone(),
            self.per_day.clone(),
        ]
    }
}

#[derive(Debug)]
pub struct HierarchicalRollup {
    name: String,
    per_minute: Arc<dyn KvStore>,
    per_hour: Arc<dyn KvStore>,
    per_day: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    // measure() holds it for writing so queries never see half a rollover.
    lock: RwLock<()>,
}

impl HierarchicalRollup {
    pub fn new(
        name: &str,
        per_minute: Arc<dyn KvStore>,
        per_hour: Arc<dyn KvStore>,
        per_day: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.to_string(),
            per_minute,
            per_hour,
            per_day,
            clock,
            lock: RwLock::new(()),
        }
    }

    pub fn from_stores(name: &str, stores: &RollupStores, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            name,
            stores.per_minute.clone(),
            stores.per_hour.clone(),
            stores.per_day.clone(),
            clock,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record the trailing one-minute average and roll it up.
    ///
    /// Negative input is stored as 0.
    ///
    /// Tiers are written minute, hour, day. If a later write fails the earlier
    /// tiers keep their new values; the next call recomputes all three.
    pub fn measure(&self, power_1m: i64) -> Result<()> {
        let _guard = self.lock.write();
        let now = self.clock.now();

        self.per_minute
            .put(&buckets::minute_key(now), power_1m.max(0), buckets::minute_ttl())
            .with_context(|| format!("{}: storing minute bucket", self.name))?;

        let minute_sum: i64 = buckets::all_minute_keys()
            .map(|k| self.per_minute.get_or(&k, 0))
            .sum();
        let hour = rounded_div(minute_sum, i64::from(MINUTES_PER_HOUR));
        self.per_hour
            .put(&buckets::hour_key(now), hour, buckets::hour_ttl())
            .with_context(|| format!("{}: storing hour bucket", self.name))?;

        let day: i64 = buckets::hour_keys_through(now)
            .map(|k| self.per_hour.get_or(&k, 0))
            .sum();
        self.per_day
            .put(&buckets::day_key(now), day, buckets::day_ttl())
            .with_context(|| format!("{}: storing day bucket", self.name))?;

        tracing::trace!(signal = %self.name, power_1m, hour, day, "rollup measured");
        Ok(())
    }

    pub fn power_current_hour(&self) -> i64 {
        let _guard = self.lock.read();
        self.per_hour.get_or(&buckets::hour_key(self.clock.now()), 0)
    }

    pub fn power_current_day(&self) -> i64 {
        let _guard = self.lock.read();
        self.per_day.get_or(&buckets::day_key(self.clock.now()), 0)
    }

    /// Sum of every day so far this year, missing days as 0.
    pub fn power_current_year(&self) -> i64 {
        let _guard = self.lock.read();
        buckets::day_keys_through(self.clock.now())
            .map(|k| self.per_day.get_or(&k, 0))
            .sum()
    }

    /// Full-year projection from the days that have data.
    ///
    /// Missing days are left out rather than counted as 0, so outages do not
    /// drag the estimate down.
    pub fn power_estimated_year(&self) -> i64 {
        let _guard = self.lock.read();
        let (sum, count) = buckets::day_keys_through(self.clock.now())
            .filter_map(|k| self.per_day.get(&k))
            .fold((0i64, 0i64), |(sum, count), v| (sum + v, count + 1));
        if count == 0 {
            return 0;
        }
        rounded_div(sum * DAYS_PER_YEAR, count)
    }
}

/// Round-half-up division for non-negative numerators.
fn rounded_div(numerator: i64, denominator: i64) -> i64 {
    (numerator + denominator / 2) / denominator
}

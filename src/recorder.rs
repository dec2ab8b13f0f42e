//! # Sliding Window Recorder
//! Change-driven step function of one power signal (default horizon 65 min).
//!
//! A sample is stored only when the value changes, so a flat signal costs one
//! entry no matter how often it is polled. Each value holds from its own
//! timestamp until the next sample (or "now" for the newest one), and averages
//! are integrated over that step function.

use std::{collections::VecDeque, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use crate::clock::Clock;

pub const DEFAULT_HORIZON_MINUTES: i64 = 65;

/// A value change of one signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub at: DateTime<Utc>,
    /// Watts; negative for net grid export.
    pub value: i64,
}

/// Thread-safe recorder of one signal's recent history.
#[derive(Debug)]
pub struct SlidingWindowRecorder {
    samples: RwLock<VecDeque<Sample>>,
    horizon: Duration,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowRecorder {
    /// Recorder keeping enough history to answer windows up to `horizon`.
    pub fn with_horizon(horizon: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            samples: RwLock::new(VecDeque::new()),
            horizon,
            clock,
        }
    }

    /// Convenience constructor for the default 65 minute horizon.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_horizon(Duration::minutes(DEFAULT_HORIZON_MINUTES), clock)
    }

    /// Record the current value of the signal at the clock's "now".
    pub fn put(&self, value: i64) {
        self.put_at(value, self.clock.now());
    }

    /// Record `value` as observed at `at`.
    ///
    /// Repeating the latest value is a no-op. A change at the exact timestamp
    /// of the newest sample overwrites it; a change older than the newest
    /// sample is dropped. Compaction runs under the same write lock.
    pub fn put_at(&self, value: i64, at: DateTime<Utc>) {
        let mut samples = self.samples.write();

        match samples.back().copied() {
            Some(last) if last.value == value => {}
            Some(last) if at < last.at => {
                tracing::debug!(
                    value,
                    at = %at,
                    newest = %last.at,
                    "dropping sample older than the newest one"
                );
            }
            Some(last) if at == last.at => {
                samples.pop_back();
                // Overwriting may turn the newest sample into a repeat of the one before it.
                if samples.back().map(|s| s.value) != Some(value) {
                    samples.push_back(Sample { at, value });
                }
            }
            _ => samples.push_back(Sample { at, value }),
        }

        compact(&mut samples, at - self.horizon);
    }

    /// Time-weighted average over the trailing `window_secs` seconds.
    pub fn windowed_average(&self, window_secs: u32) -> i64 {
        self.windowed_average_at(window_secs, self.clock.now())
    }

    /// Time-weighted average over `[now - window_secs, now]`.
    ///
    /// Time before the oldest retained sample contributes nothing, but the
    /// divisor stays the full window. Truncates toward zero.
    pub fn windowed_average_at(&self, window_secs: u32, now: DateTime<Utc>) -> i64 {
        if window_secs == 0 {
            return 0;
        }
        let window_start = now - Duration::seconds(i64::from(window_secs));

        let samples = self.samples.read();
        let mut cursor = now;
        let mut watt_millis: i128 = 0;

        for sample in samples.iter().rev() {
            let start = sample.at.max(window_start);
            if start < cursor {
                let elapsed_ms = (cursor - start).num_milliseconds();
                watt_millis += i128::from(sample.value) * i128::from(elapsed_ms);
                cursor = start;
            }
            if start == window_start {
                break;
            }
        }

        // Bounded by the largest |value|, so it always fits.
        (watt_millis / (i128::from(window_secs) * 1_000)) as i64
    }

    /// Number of retained samples.
    pub fn len(&self) -> usize {
        self.samples.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.read().is_empty()
    }

    pub fn horizon(&self) -> Duration {
        self.horizon
    }

    /// Newest sample, i.e. the value currently held.
    pub fn latest(&self) -> Option<Sample> {
        self.samples.read().back().copied()
    }

    /// Copy of the retained samples, oldest first.
    pub fn samples(&self) -> Vec<Sample> {
        self.samples.read().iter().copied().collect()
    }
}

/// Drop old samples but keep the newest one at or before `cutoff`, so the
/// whole horizon stays answerable.
fn compact(samples: &mut VecDeque<Sample>, cutoff: DateTime<Utc>) {
    while samples.len() >= 2 && samples[1].at <= cutoff {
        samples.pop_front();
    }
}

// tests/recorder_window.rs
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use energy_monitor::clock::ManualClock;
use energy_monitor::recorder::SlidingWindowRecorder;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 21, 4, 0, 0).unwrap()
}

fn recorder(horizon: Duration) -> SlidingWindowRecorder {
    SlidingWindowRecorder::with_horizon(horizon, Arc::new(ManualClock::new(t0())))
}

#[test]
fn repeated_values_are_stored_once() {
    let r = recorder(Duration::minutes(65));
    for s in 0..30 {
        r.put_at(250, t0() + Duration::seconds(s));
    }
    assert_eq!(r.len(), 1);
    assert_eq!(r.latest().unwrap().at, t0());

    r.put_at(260, t0() + Duration::seconds(31));
    r.put_at(260, t0() + Duration::seconds(32));
    assert_eq!(r.len(), 2);
}

#[test]
fn single_sample_ramps_up_to_its_value() {
    let r = recorder(Duration::minutes(65));
    r.put_at(600, t0());

    // only the part of the window after the sample counts
    assert_eq!(r.windowed_average_at(60, t0() + Duration::seconds(30)), 300);
    assert_eq!(r.windowed_average_at(60, t0() + Duration::seconds(10)), 100);
    // once the whole window is covered the value is exact
    assert_eq!(r.windowed_average_at(60, t0() + Duration::seconds(60)), 600);
    assert_eq!(r.windowed_average_at(60, t0() + Duration::minutes(30)), 600);
}

#[test]
fn steps_are_time_weighted() {
    let r = recorder(Duration::minutes(65));
    r.put_at(0, t0());
    r.put_at(1000, t0() + Duration::seconds(30));

    assert_eq!(r.windowed_average_at(60, t0() + Duration::seconds(60)), 500);
    // 3 minutes: 30 s of 0, 150 s of 1000
    assert_eq!(r.windowed_average_at(180, t0() + Duration::seconds(180)), 833);
    assert_eq!(r.windowed_average_at(180, t0() + Duration::seconds(60)), 166);
}

#[test]
fn average_truncates_toward_zero_for_export() {
    let r = recorder(Duration::minutes(65));
    r.put_at(-100, t0());
    // -100 * 20 / 60 = -33.3
    assert_eq!(r.windowed_average_at(60, t0() + Duration::seconds(20)), -33);
}

#[test]
fn one_minute_horizon_stays_bounded_over_a_day() {
    let r = recorder(Duration::minutes(1));
    let step = Duration::minutes(5);

    let value = |i: i64| if i % 2 == 0 { 100 + i } else { -(100 + i) };

    for i in 0..(24 * 12) {
        let at = t0() + step * i as i32;
        r.put_at(value(i), at);
        assert!(r.len() <= 2, "len {} at step {i}", r.len());

        if i > 0 {
            // the sample straddling the horizon is kept next to the newest
            let kept = r.samples();
            assert_eq!(kept.len(), 2);
            assert_eq!(kept[0].at, at - step);
            assert_eq!(kept[1].at, at);

            let half = r.windowed_average_at(60, at + Duration::seconds(30));
            assert_eq!(half, (value(i) + value(i - 1)) / 2);
        }
    }
}

#[test]
fn stale_and_same_instant_puts() {
    let r = recorder(Duration::minutes(65));
    r.put_at(10, t0());
    r.put_at(20, t0() + Duration::seconds(10));

    // older than the newest sample: dropped
    r.put_at(99, t0() + Duration::seconds(5));
    assert_eq!(r.latest().unwrap().value, 20);

    // same instant: overwrites
    r.put_at(30, t0() + Duration::seconds(10));
    assert_eq!(r.len(), 2);
    assert_eq!(r.latest().unwrap().value, 30);

    // overwrite back to the previous value collapses the pair
    r.put_at(10, t0() + Duration::seconds(10));
    assert_eq!(r.len(), 1);
    assert_eq!(r.latest().unwrap().at, t0());
}

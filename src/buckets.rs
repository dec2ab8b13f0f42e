//! # Time buckets
//! Keys and retention for the minute / hour / day tiers of a rollup.
//!
//! Keys are the plain decimal minute-of-hour (0–59), hour-of-day (0–23) and
//! day-of-year (1–366) of a UTC timestamp. No zero padding, so the key that
//! `measure` writes is byte-identical to the one the year queries read back.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

pub const MINUTES_PER_HOUR: u32 = 60;
pub const HOURS_PER_DAY: u32 = 24;
pub const DAYS_PER_YEAR: i64 = 365;

/// Minute buckets must outlive one full hour of rollover.
pub fn minute_ttl() -> Duration {
    Duration::minutes(61)
}

pub fn hour_ttl() -> Duration {
    Duration::hours(25)
}

pub fn day_ttl() -> Duration {
    Duration::days(366)
}

pub fn minute_of_hour(at: DateTime<Utc>) -> u32 {
    at.minute()
}

pub fn hour_of_day(at: DateTime<Utc>) -> u32 {
    at.hour()
}

pub fn day_of_year(at: DateTime<Utc>) -> u32 {
    at.ordinal()
}

pub fn minute_key(at: DateTime<Utc>) -> String {
    minute_of_hour(at).to_string()
}

pub fn hour_key(at: DateTime<Utc>) -> String {
    hour_of_day(at).to_string()
}

pub fn day_key(at: DateTime<Utc>) -> String {
    day_of_year(at).to_string()
}

/// All minute keys of an hour, in order.
pub fn all_minute_keys() -> impl Iterator<Item = String> {
    (0..MINUTES_PER_HOUR).map(|m| m.to_string())
}

/// Hour keys from midnight up to and including `at`'s hour.
pub fn hour_keys_through(at: DateTime<Utc>) -> impl Iterator<Item = String> {
    (0..=hour_of_day(at)).map(|h| h.to_string())
}

/// Day keys from January 1st up to and including `at`'s day.
pub fn day_keys_through(at: DateTime<Utc>) -> impl Iterator<Item = String> {
    (1..=day_of_year(at)).map(|d| d.to_string())
}

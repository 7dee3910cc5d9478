//! Conversions between epoch-millisecond timestamps and calendar dates.
//!
//! Every conversion takes the zone explicitly; the `Local` wrappers read the
//! device zone at call time so a zone change between calls is honoured.

use chrono::{Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};

pub const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Sentinel for "no end date" on a recurrence.
pub const UNBOUNDED: i64 = i64::MAX;

/// Calendar date of `millis` in `tz`, or `None` if chrono cannot represent it.
pub fn date_in<Tz: TimeZone>(millis: i64, tz: &Tz) -> Option<NaiveDate> {
    tz.timestamp_millis_opt(millis)
        .single()
        .map(|dt| dt.date_naive())
}

/// Wall-clock time of day of `millis` in `tz`.
pub fn time_of_day_in<Tz: TimeZone>(millis: i64, tz: &Tz) -> Option<NaiveTime> {
    tz.timestamp_millis_opt(millis).single().map(|dt| dt.time())
}

/// Epoch millis of `date` at `time` in `tz`.
pub fn combine_in<Tz: TimeZone>(date: NaiveDate, time: NaiveTime, tz: &Tz) -> i64 {
    let naive = date.and_time(time);
    if let Some(dt) = tz.from_local_datetime(&naive).earliest() {
        return dt.timestamp_millis();
    }
    // Wall time skipped by a DST gap.
    let shifted: NaiveDateTime = naive + Duration::hours(1);
    tz.from_local_datetime(&shifted)
        .earliest()
        .map(|dt| dt.timestamp_millis())
        .unwrap_or_else(|| naive.and_utc().timestamp_millis())
}

pub fn start_of_day_in<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> i64 {
    combine_in(date, NaiveTime::MIN, tz)
}

/// Same wall-clock time, `days` calendar days later.
pub fn add_days_in<Tz: TimeZone>(millis: i64, days: i64, tz: &Tz) -> i64 {
    match (date_in(millis, tz), time_of_day_in(millis, tz)) {
        (Some(date), Some(time)) => combine_in(date + Duration::days(days), time, tz),
        _ => millis.saturating_add(days.saturating_mul(MILLIS_PER_DAY)),
    }
}

pub fn local_date(millis: i64) -> Option<NaiveDate> {
    date_in(millis, &Local)
}

pub fn local_time_of_day(millis: i64) -> Option<NaiveTime> {
    time_of_day_in(millis, &Local)
}

pub fn local_millis(date: NaiveDate, time: NaiveTime) -> i64 {
    combine_in(date, time, &Local)
}

pub fn start_of_local_day(date: NaiveDate) -> i64 {
    start_of_day_in(date, &Local)
}

pub fn add_local_days(millis: i64, days: i64) -> i64 {
    add_days_in(millis, days, &Local)
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

pub fn start_of_today() -> i64 {
    start_of_local_day(today())
}

pub fn now_millis() -> i64 {
    Local::now().timestamp_millis()
}

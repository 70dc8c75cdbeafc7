use chrono::{FixedOffset, NaiveDateTime, TimeZone, Timelike};
use rand::Rng;

/// A random offset in `[-variance, variance]` minutes.
pub fn roll_jitter<R: Rng>(rng: &mut R, variance: i64) -> i64 {
    if variance <= 0 {
        0
    } else {
        rng.gen_range(-variance..=variance)
    }
}

/// Whether `base + jitter` minutes have passed since the last successful run.
/// A job that never succeeded may always run.
pub fn interval_elapsed(
    last_success: Option<NaiveDateTime>,
    now: NaiveDateTime,
    base_minutes: i64,
    variance_minutes: i64,
    jitter: i64,
) -> bool {
    let last = match last_success {
        Some(last) => last,
        None => return true,
    };
    let variance = variance_minutes.max(0);
    let required = base_minutes + jitter.clamp(-variance, variance);
    (now - last).num_seconds() >= required * 60
}

pub fn minutes_remaining(last_success: Option<NaiveDateTime>, now: NaiveDateTime, required_minutes: i64) -> f64 {
    match last_success {
        Some(last) => {
            let elapsed = (now - last).num_seconds() as f64 / 60.0;
            (required_minutes as f64 - elapsed).max(0.0)
        }
        None => 0.0,
    }
}

/// Whether `hour` falls in `[start, end)`. A window with `start > end` wraps past midnight.
pub fn in_blackout(hour: u32, start: u32, end: u32) -> bool {
    if start > end {
        hour >= start || hour < end
    } else {
        hour >= start && hour < end
    }
}

/// Hour of the day on the site's local clock.
pub fn local_hour(now_utc: NaiveDateTime, offset: FixedOffset) -> u32 {
    offset.from_utc_datetime(&now_utc).hour()
}

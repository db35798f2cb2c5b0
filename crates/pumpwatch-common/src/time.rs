//! ---
//! pw_section: "01-core-functionality"
//! pw_subsection: "module"
//! pw_type: "source"
//! pw_scope: "code"
//! pw_description: "Virtual clock helpers shared by simulation and detection."
//! pw_version: "v0.1.0"
//! pw_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Timestamp `secs` seconds after `anchor`, with microsecond resolution.
pub fn offset_secs(anchor: DateTime<Utc>, secs: f64) -> DateTime<Utc> {
    let micros = (secs * 1_000_000.0).round() as i64;
    anchor + chrono::Duration::microseconds(micros)
}

/// Signed number of seconds from `earlier` to `later`.
pub fn seconds_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    let delta = later - earlier;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1_000.0,
    }
}

/// Tick period for a frequency in hertz.
pub fn period_from_hz(hz: f64) -> Duration {
    Duration::from_secs_f64(1.0 / hz)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn offsets_round_trip_through_seconds_between() {
        let anchor = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let later = offset_secs(anchor, 3599.5);
        assert!((seconds_between(anchor, later) - 3599.5).abs() < 1e-9);
        assert!(seconds_between(later, anchor) < 0.0);
    }

    #[test]
    fn period_matches_frequency() {
        assert_eq!(period_from_hz(1.0), Duration::from_secs(1));
        assert_eq!(period_from_hz(4.0), Duration::from_millis(250));
    }
}

//! Deterministic document paths.
//!
//! Every durable record lives under a path derived from
//! `{type prefix, account id, time bucket}`. Time-bucketed paths double
//! as idempotency keys: two writers observing the same wall clock land
//! on the same path and overwrite rather than duplicate.

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use fleetwarden_types::models::ProbeKind;

pub const BACKFILL_LOCKS: &str = "backfill_locks";
pub const BACKFILL_META: &str = "backfill_meta";
pub const TELEMETRY_LOCKS: &str = "telemetry/locks";
pub const HEARTBEATS: &str = "telemetry/heartbeats";
pub const PROBES: &str = "telemetry/probes";
pub const INCIDENTS: &str = "telemetry/incidents";
pub const ROLLUPS: &str = "telemetry/rollups";

pub fn backfill_lock(account_id: &str) -> String {
    format!("{BACKFILL_LOCKS}/{account_id}")
}

pub fn backfill_meta(account_id: &str) -> String {
    format!("{BACKFILL_META}/{account_id}")
}

pub fn leader_lock(name: &str) -> String {
    format!("{TELEMETRY_LOCKS}/{name}")
}

/// Heartbeat bucket id: timestamp truncated to the heartbeat interval,
/// rendered as `hb-YYYYMMDDTHHMMSSZ`. Monotonic in wall-clock time and
/// collision-free across writers observing the same second.
pub fn heartbeat_bucket(ts_ms: i64, interval_sec: u64) -> String {
    let interval_ms = (interval_sec as i64) * 1000;
    let truncated = ts_ms - ts_ms.rem_euclid(interval_ms.max(1000));
    let dt = utc(truncated);
    format!(
        "hb-{:04}{:02}{:02}T{:02}{:02}{:02}Z",
        dt.year(),
        dt.month(),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second()
    )
}

pub fn heartbeat(bucket_id: &str) -> String {
    format!("{HEARTBEATS}/{bucket_id}")
}

/// Probe key: `{prefix}-YYYYMMDDHH` for hourly kinds, `{prefix}-YYYYMMDD`
/// for daily kinds, so a given hour or day yields at most one record.
pub fn probe_key(kind: ProbeKind, ts_ms: i64) -> String {
    let dt = utc(ts_ms);
    match kind {
        ProbeKind::Outbound | ProbeKind::Inbound => format!(
            "{}-{:04}{:02}{:02}{:02}",
            kind.key_prefix(),
            dt.year(),
            dt.month(),
            dt.day(),
            dt.hour()
        ),
        ProbeKind::Queue => {
            format!("{}-{:04}{:02}{:02}", kind.key_prefix(), dt.year(), dt.month(), dt.day())
        },
    }
}

pub fn probe(probe_key: &str) -> String {
    format!("{PROBES}/{probe_key}")
}

pub fn probe_prefix(kind: ProbeKind) -> String {
    format!("{PROBES}/{}-", kind.key_prefix())
}

/// Missed-heartbeat incidents are keyed by the hour they cover, so
/// re-running the check for the same hour is idempotent.
pub fn missed_heartbeat_incident(ts_ms: i64) -> String {
    let dt = utc(ts_ms);
    format!(
        "{INCIDENTS}/missed-hb-{:04}{:02}{:02}{:02}",
        dt.year(),
        dt.month(),
        dt.day(),
        dt.hour()
    )
}

/// Probe-failure incidents are keyed by the probe record that tripped
/// the threshold, for the same reason.
pub fn probe_failure_incident(probe_key: &str) -> String {
    format!("{INCIDENTS}/probe-fail-{probe_key}")
}

pub fn incidents_prefix() -> String {
    format!("{INCIDENTS}/")
}

pub fn rollup(date: &str) -> String {
    format!("{ROLLUPS}/{date}")
}

/// `YYYY-MM-DD` in UTC for a timestamp.
pub fn date_key(ts_ms: i64) -> String {
    utc(ts_ms).format("%Y-%m-%d").to_string()
}

fn utc(ts_ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ts_ms).single().unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_bucket_truncates_to_interval() {
        // 2024-05-01T10:17:45Z
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 10, 17, 45).unwrap().timestamp_millis();
        assert_eq!(heartbeat_bucket(ts, 60), "hb-20240501T101700Z");
        // Same minute, different second -> same bucket
        let ts2 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 17, 3).unwrap().timestamp_millis();
        assert_eq!(heartbeat_bucket(ts2, 60), heartbeat_bucket(ts, 60));
    }

    #[test]
    fn test_heartbeat_buckets_are_monotonic() {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 23, 59, 0).unwrap().timestamp_millis();
        let a = heartbeat_bucket(base, 60);
        let b = heartbeat_bucket(base + 60_000, 60);
        let c = heartbeat_bucket(base + 120_000, 60);
        assert!(a < b, "{a} should sort before {b}");
        assert!(b < c, "{b} should sort before {c} across the midnight boundary");
    }

    #[test]
    fn test_same_second_writers_share_a_bucket() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 30).unwrap().timestamp_millis();
        // Two writers within the same wall-clock second
        assert_eq!(heartbeat_bucket(ts + 100, 60), heartbeat_bucket(ts + 900, 60));
    }

    #[test]
    fn test_probe_keys_truncate_per_kind() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 10, 17, 45).unwrap().timestamp_millis();
        assert_eq!(probe_key(ProbeKind::Outbound, ts), "OUT-2024050110");
        assert_eq!(probe_key(ProbeKind::Inbound, ts), "IN-2024050110");
        assert_eq!(probe_key(ProbeKind::Queue, ts), "QUEUE-20240501");
    }

    #[test]
    fn test_date_key() {
        let ts = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap().timestamp_millis();
        assert_eq!(date_key(ts), "2024-12-31");
    }
}

//! Daily rollups.
//!
//! One document per UTC day, computed after midnight for the previous
//! day and skipped when it already exists. Coverage below the
//! configured threshold flags the rollup as insufficient and raises an
//! alert; exactly at the threshold counts as sufficient.

use std::collections::HashMap;

use fleetwarden_types::models::{Incident, ProbeKind, ProbeResult, Rollup};
use tracing::{info, warn};

use super::TelemetryPipeline;
use crate::store::{self, paths};

const DAY_MS: i64 = 86_400_000;

/// Nearest-rank percentile over an ascending-sorted slice.
fn percentile(sorted: &[u64], q: f64) -> Option<u64> {
    if sorted.is_empty() {
        return None;
    }
    let index = ((sorted.len() as f64) * q).floor() as usize;
    Some(sorted[index.min(sorted.len() - 1)])
}

impl TelemetryPipeline {
    /// Compute and store the rollup for the day before `now_ms`, unless
    /// it already exists.
    pub(super) async fn run_daily_rollup_at(&self, now_ms: i64) {
        let day_start = now_ms - now_ms.rem_euclid(DAY_MS) - DAY_MS;
        let day_end = day_start + DAY_MS;
        let date = paths::date_key(day_start);
        let path = paths::rollup(&date);

        match self.store.get(&path).await {
            Ok(Some(_)) => return,
            Ok(None) => {},
            Err(e) => {
                warn!(date = %date, error = %e, "Rollup existence check failed");
                return;
            },
        }

        let expected = (86_400 / self.config.heartbeat_interval_sec.max(1)) as u64;
        let written = self.count_heartbeats_between(day_start, day_end).await;
        let missed = expected.saturating_sub(written);
        let coverage = if expected > 0 { written as f64 / expected as f64 } else { 0.0 };
        let uptime_pct = (coverage * 100.0 * 100.0).round() / 100.0;

        let mut probe_pass_rates = HashMap::new();
        for kind in ProbeKind::ALL {
            let mut pass = 0u64;
            let mut fail = 0u64;
            for record in self.recent_probes(kind).await {
                if record.ts_ms >= day_start && record.ts_ms < day_end {
                    match record.result {
                        ProbeResult::Pass => pass += 1,
                        ProbeResult::Fail => fail += 1,
                    }
                }
            }
            if pass + fail > 0 {
                probe_pass_rates
                    .insert(kind.to_string(), pass as f64 / (pass + fail) as f64 * 100.0);
            }
        }

        let incidents = self.incidents_between(day_start, day_end).await;
        let mut recoveries: Vec<u64> =
            incidents.iter().filter_map(|i| i.recovery_sec).collect();
        recoveries.sort_unstable();

        let rollup = Rollup {
            date: date.clone(),
            expected_heartbeats: expected,
            written_heartbeats: written,
            missed_heartbeats: missed,
            uptime_pct,
            probe_pass_rates,
            recovery_p50_sec: percentile(&recoveries, 0.5),
            recovery_p90_sec: percentile(&recoveries, 0.9),
            recovery_p95_sec: percentile(&recoveries, 0.95),
            incident_count: incidents.len(),
            insufficient_data: coverage < self.config.insufficient_data_threshold,
            coverage: (coverage * 1000.0).round() / 1000.0,
            instance_id: self.instance_id.clone(),
        };

        let value = match store::encode(&path, &rollup) {
            Ok(v) => v,
            Err(e) => {
                warn!(date = %date, error = %e, "Rollup encode failed");
                return;
            },
        };
        if let Err(e) = self.store.set(&path, value, false).await {
            warn!(date = %date, error = %e, "Rollup write failed");
            return;
        }

        info!(
            date = %date,
            uptime_pct,
            incidents = rollup.incident_count,
            insufficient = rollup.insufficient_data,
            "Daily rollup created"
        );

        if rollup.insufficient_data {
            self.alerts.dispatch(
                &format!("rollup_insufficient:{date}"),
                format!(
                    "INSUFFICIENT ROLLUP DATA\ndate {date}\ncoverage {:.1}% (threshold {:.0}%)",
                    coverage * 100.0,
                    self.config.insufficient_data_threshold * 100.0
                ),
            );
        }
    }

    /// Load the stored rollup for a date, if present.
    pub async fn rollup_for(&self, date: &str) -> Option<Rollup> {
        let path = paths::rollup(date);
        let value = self.store.get(&path).await.ok()??;
        store::decode(&path, value).ok()
    }

    async fn incidents_between(&self, from_ms: i64, to_ms: i64) -> Vec<Incident> {
        let listed = match self.store.list(&paths::incidents_prefix()).await {
            Ok(listed) => listed,
            Err(e) => {
                warn!(error = %e, "Incident listing failed");
                return Vec::new();
            },
        };
        listed
            .into_iter()
            .filter_map(|(path, value)| store::decode::<Incident>(&path, value).ok())
            .filter(|i| i.ts_start_ms >= from_ms && i.ts_start_ms < to_ms)
            .collect()
    }
}

//! Incident derivation.
//!
//! Both checks inspect current data instead of accumulating counters:
//! the missed-heartbeat check counts the documents actually present for
//! the last hour, and the probe-streak check re-reads the latest probe
//! records. Deterministic incident ids make re-running a check
//! idempotent, and alerts fire only when an incident document is
//! actually created.

use fleetwarden_types::models::{Incident, IncidentKind, ProbeKind, ProbeResult};
use serde_json::Value;
use tracing::{debug, warn};

use super::TelemetryPipeline;
use crate::store::{self, paths};

const HOUR_MS: i64 = 3_600_000;

impl TelemetryPipeline {
    /// Count heartbeats written in the last hour; open an incident when
    /// more than the configured number went missing.
    pub(super) async fn check_missed_heartbeats_at(&self, now_ms: i64) {
        let window_start = now_ms - HOUR_MS;
        let written = self.count_heartbeats_between(window_start, now_ms).await;
        let expected = 3_600 / self.config.heartbeat_interval_sec.max(1);
        let missed = expected.saturating_sub(written);

        debug!(written, expected, missed, "Heartbeat coverage check");
        if missed <= self.config.alerts.missed_heartbeats_per_hour {
            return;
        }

        let path = paths::missed_heartbeat_incident(now_ms);
        let incident = Incident {
            incident_id: path.rsplit('/').next().unwrap_or(&path).to_string(),
            kind: IncidentKind::MissedHeartbeats,
            ts_start_ms: window_start,
            ts_end_ms: Some(now_ms),
            recovery_sec: None,
            reason: format!("Missed {missed} of {expected} heartbeats in the last hour"),
            account_id: None,
            probe_kind: None,
            instance_id: self.instance_id.clone(),
        };

        if self.create_incident(&path, &incident).await {
            self.alerts.dispatch(
                &format!("missed_hb:{}", incident.incident_id),
                format!(
                    "MISSED HEARTBEATS\nmissed {missed}/{expected} in the last hour\nincident {}",
                    incident.incident_id
                ),
            );
        }
    }

    /// Evaluate the latest probe records for one kind: open an incident
    /// on a failure streak, close open incidents on recovery.
    pub(super) async fn check_probe_streak_at(&self, kind: ProbeKind, now_ms: i64) {
        let records = self.recent_probes(kind).await;
        if records.is_empty() {
            return;
        }

        if records[0].result == ProbeResult::Pass {
            self.close_probe_incidents(kind, now_ms).await;
            return;
        }

        let streak: Vec<_> =
            records.iter().take_while(|r| r.result == ProbeResult::Fail).collect();
        if streak.len() < self.config.alerts.consecutive_probe_failures {
            return;
        }

        let newest = streak[0];
        let oldest = streak[streak.len() - 1];
        let path = paths::probe_failure_incident(&newest.probe_key);
        let incident = Incident {
            incident_id: path.rsplit('/').next().unwrap_or(&path).to_string(),
            kind: IncidentKind::ProbeFailureStreak,
            ts_start_ms: oldest.ts_ms,
            ts_end_ms: None,
            recovery_sec: None,
            reason: format!("{} consecutive {kind} probe failures", streak.len()),
            account_id: None,
            probe_kind: Some(kind),
            instance_id: self.instance_id.clone(),
        };

        if self.create_incident(&path, &incident).await {
            self.alerts.dispatch(
                &format!("probe_fail:{kind}"),
                format!(
                    "PROBE FAILURES\n{} consecutive {kind} probe failures\nlatest {}",
                    streak.len(),
                    newest.probe_key
                ),
            );
        }
    }

    /// Close any open probe-streak incidents for a kind that just
    /// passed, recording the time to recovery.
    async fn close_probe_incidents(&self, kind: ProbeKind, now_ms: i64) {
        let listed = match self.store.list(&paths::incidents_prefix()).await {
            Ok(listed) => listed,
            Err(e) => {
                warn!(error = %e, "Incident listing failed");
                return;
            },
        };

        for (path, value) in listed {
            let Ok(incident) = store::decode::<Incident>(&path, value) else { continue };
            if incident.kind != IncidentKind::ProbeFailureStreak
                || incident.probe_kind != Some(kind)
                || incident.ts_end_ms.is_some()
            {
                continue;
            }
            let recovery_sec = ((now_ms - incident.ts_start_ms).max(0) / 1000) as u64;
            let patch = serde_json::json!({
                "ts_end_ms": now_ms,
                "recovery_sec": recovery_sec,
            });
            if let Err(e) = self.store.set(&path, patch, true).await {
                warn!(incident = %incident.incident_id, error = %e, "Incident close failed");
            } else {
                debug!(
                    incident = %incident.incident_id,
                    recovery_sec,
                    "Probe incident closed after recovery"
                );
            }
        }
    }

    /// Write an incident document unless it already exists. Returns
    /// whether this call created it.
    async fn create_incident(&self, path: &str, incident: &Incident) -> bool {
        let encoded = match store::encode(path, incident) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Incident encode failed");
                return false;
            },
        };
        let outcome = self
            .store
            .run_transaction(
                path,
                Box::new(move |current: Option<&Value>| {
                    if current.is_some() {
                        crate::store::TxDecision::Abort
                    } else {
                        crate::store::TxDecision::Write(encoded)
                    }
                }),
            )
            .await;
        match outcome {
            Ok(outcome) if outcome.committed() => {
                warn!(incident = %incident.incident_id, reason = %incident.reason, "Incident created");
                true
            },
            Ok(_) => false,
            Err(e) => {
                warn!(incident = %incident.incident_id, error = %e, "Incident write failed");
                false
            },
        }
    }

    /// Heartbeat documents whose timestamp lies in `[from_ms, to_ms)`.
    pub(super) async fn count_heartbeats_between(&self, from_ms: i64, to_ms: i64) -> u64 {
        // An hour window touches at most two day prefixes
        let mut prefixes = vec![format!("{}/hb-{}", paths::HEARTBEATS, compact_date(from_ms))];
        let to_prefix = format!("{}/hb-{}", paths::HEARTBEATS, compact_date(to_ms));
        if !prefixes.contains(&to_prefix) {
            prefixes.push(to_prefix);
        }

        let mut count = 0u64;
        for prefix in prefixes {
            let Ok(listed) = self.store.list(&prefix).await else { continue };
            for (_, value) in listed {
                let ts = value.get("ts_ms").and_then(Value::as_i64).unwrap_or(0);
                if ts >= from_ms && ts < to_ms {
                    count += 1;
                }
            }
        }
        count
    }
}

/// `YYYYMMDD` (no separators) for heartbeat bucket prefixes.
fn compact_date(ts_ms: i64) -> String {
    paths::date_key(ts_ms).replace('-', "")
}

//! Scheduled synthetic probes.
//!
//! Each probe kind is keyed by `{type, truncated timestamp}`, so a given
//! hour (outbound/inbound) or day (queue) yields at most one record no
//! matter how often the scheduler restarts. A probe round also drives
//! the failure-streak incident check for its kind.

use fleetwarden_types::models::{ProbeKind, ProbeRecord, ProbeResult};
use tracing::{debug, info, warn};

use super::TelemetryPipeline;
use crate::store::{self, paths};

impl TelemetryPipeline {
    /// Run one probe if its bucket has not been recorded yet, then
    /// evaluate the kind's failure streak.
    pub(super) async fn run_probe_at(&self, kind: ProbeKind, now_ms: i64) {
        let probe_key = paths::probe_key(kind, now_ms);
        let path = paths::probe(&probe_key);

        match self.store.get(&path).await {
            Ok(Some(_)) => {
                debug!(probe_key = %probe_key, "Probe bucket already recorded, skipping");
            },
            Ok(None) => {
                let outcome = self.prober.probe(kind).await;
                let record = ProbeRecord {
                    probe_key: probe_key.clone(),
                    kind,
                    ts_ms: now_ms,
                    result: outcome.result,
                    latency_ms: outcome.latency_ms,
                    instance_id: self.instance_id.clone(),
                    detail: outcome.detail,
                };

                match outcome.result {
                    ProbeResult::Pass => {
                        info!(probe_key = %probe_key, latency_ms = outcome.latency_ms, "Probe passed")
                    },
                    ProbeResult::Fail => {
                        warn!(probe_key = %probe_key, detail = ?record.detail, "Probe failed")
                    },
                }

                let value = match store::encode(&path, &record) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(probe_key = %probe_key, error = %e, "Probe encode failed");
                        return;
                    },
                };
                if let Err(e) = self.store.set(&path, value, false).await {
                    warn!(probe_key = %probe_key, error = %e, "Probe write failed");
                    return;
                }
            },
            Err(e) => {
                warn!(probe_key = %probe_key, error = %e, "Probe bucket read failed");
                return;
            },
        }

        self.check_probe_streak_at(kind, now_ms).await;
    }

    /// Most-recent-first probe records for one kind.
    pub(super) async fn recent_probes(&self, kind: ProbeKind) -> Vec<ProbeRecord> {
        let prefix = paths::probe_prefix(kind);
        let listed = match self.store.list(&prefix).await {
            Ok(listed) => listed,
            Err(e) => {
                warn!(kind = %kind, error = %e, "Probe listing failed");
                return Vec::new();
            },
        };
        let mut records: Vec<ProbeRecord> = listed
            .into_iter()
            .filter_map(|(path, value)| store::decode(&path, value).ok())
            .collect();
        // Keys sort chronologically; newest last
        records.reverse();
        records
    }
}

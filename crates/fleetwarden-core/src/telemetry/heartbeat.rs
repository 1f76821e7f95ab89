//! Heartbeat emission.
//!
//! One document per interval-truncated bucket. A restarted or duplicate
//! leader writing the same bucket overwrites instead of duplicating; a
//! failed write is logged and abandoned, and the resulting gap surfaces
//! through the missed-heartbeat incident check rather than being hidden.

use fleetwarden_types::models::Heartbeat;
use tracing::{debug, warn};

use super::TelemetryPipeline;
use crate::store::{self, paths};

/// RSS of the current process, in bytes.
fn process_rss_bytes() -> u64 {
    let Ok(pid) = sysinfo::get_current_pid() else { return 0 };
    let mut sys = sysinfo::System::new();
    sys.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[pid]));
    sys.process(pid).map(|p| p.memory()).unwrap_or(0)
}

impl TelemetryPipeline {
    pub(super) async fn emit_heartbeat_at(&self, now_ms: i64) {
        let interval_sec = self.config.heartbeat_interval_sec;
        let bucket_id = paths::heartbeat_bucket(now_ms, interval_sec);
        let path = paths::heartbeat(&bucket_id);

        let drift_sec = {
            let mut last = self.last_heartbeat_ms.lock();
            let drift = last
                .map(|prev| {
                    let actual_sec = (now_ms - prev).max(0) as u64 / 1000;
                    actual_sec.abs_diff(interval_sec)
                })
                .unwrap_or(0);
            *last = Some(now_ms);
            drift
        };

        let heartbeat = Heartbeat {
            bucket_id: bucket_id.clone(),
            ts_ms: now_ms,
            instance_id: self.instance_id.clone(),
            uptime_sec: self.started_at.elapsed().as_secs(),
            memory_rss_bytes: process_rss_bytes(),
            connected_count: self.stats.connected_count(),
            reconnecting_count: self.stats.reconnecting_count(),
            queue_depth: self.stats.queue_depth(),
            expected_interval_sec: interval_sec,
            drift_sec,
        };

        let value = match store::encode(&path, &heartbeat) {
            Ok(v) => v,
            Err(e) => {
                warn!(bucket_id = %bucket_id, error = %e, "Heartbeat encode failed");
                return;
            },
        };

        match self.store.set(&path, value, false).await {
            Ok(()) => {
                debug!(
                    bucket_id = %bucket_id,
                    connected = heartbeat.connected_count,
                    queue_depth = heartbeat.queue_depth,
                    drift_sec,
                    "Heartbeat written"
                );
            },
            Err(e) => {
                // Abandon this tick; the gap is counted, not hidden
                warn!(bucket_id = %bucket_id, error = %e, "Heartbeat write failed");
            },
        }
    }
}

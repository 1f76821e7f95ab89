//! HTTP adapters for the external collaborators.
//!
//! The transport connector is a separate service; the daemon talks to
//! it over webhooks: sends are POSTed to it, and it calls back into the
//! event-ingestion API. Alerts go to a plain webhook, and probes run
//! against the connector's health endpoint and the local queues.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use fleetwarden_core::alert::AlertChannel;
use fleetwarden_core::backfill::BackfillRunner;
use fleetwarden_core::telemetry::Prober;
use fleetwarden_core::transport::Transport;
use fleetwarden_core::FleetService;
use fleetwarden_types::models::{BackfillStats, ProbeKind, ProbeOutcome, ProbeResult, ProxyRecord};

/// Queue depth above which the queue probe reports FAIL.
const QUEUE_DEPTH_THRESHOLD: usize = 100;

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

/// Sends outbound messages to the connector service.
pub struct WebhookTransport {
    client: reqwest::Client,
    base_url: String,
}

impl WebhookTransport {
    pub fn new(base_url: String) -> Self {
        Self { client: http_client(Duration::from_secs(30)), base_url }
    }
}

#[async_trait]
impl Transport for WebhookTransport {
    async fn send(
        &self,
        account_id: &str,
        recipient: &str,
        payload: &str,
        egress: Option<&ProxyRecord>,
    ) -> Result<(), String> {
        let url = format!("{}/accounts/{account_id}/send", self.base_url);
        let body = json!({
            "recipient": recipient,
            "payload": payload,
            "egress": egress.map(|p| &p.endpoint),
        });
        let response =
            self.client.post(&url).json(&body).send().await.map_err(|e| e.to_string())?;
        if response.status().is_success() {
            debug!(account_id = %account_id, recipient = %recipient, "Send delivered to connector");
            Ok(())
        } else {
            Err(format!("connector returned {}", response.status()))
        }
    }
}

/// Posts alert text to a plain webhook.
pub struct WebhookAlertChannel {
    client: reqwest::Client,
    url: Option<String>,
}

impl WebhookAlertChannel {
    pub fn new(url: Option<String>) -> Self {
        Self { client: http_client(Duration::from_secs(10)), url }
    }
}

#[async_trait]
impl AlertChannel for WebhookAlertChannel {
    async fn send_text(&self, text: &str) -> Result<(), String> {
        let Some(ref url) = self.url else {
            debug!("Alert webhook not configured, dropping alert");
            return Ok(());
        };
        let response = self
            .client
            .post(url)
            .json(&json!({ "text": text }))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("alert webhook returned {}", response.status()))
        }
    }
}

/// Probe executor: connector reachability for outbound/inbound, local
/// queue depth for queue.
pub struct ConnectorProber {
    client: reqwest::Client,
    connector_url: Option<String>,
    fleet: Arc<FleetService>,
}

impl ConnectorProber {
    pub fn new(connector_url: Option<String>, fleet: Arc<FleetService>) -> Self {
        Self { client: http_client(Duration::from_secs(10)), connector_url, fleet }
    }

    async fn probe_connector(&self) -> ProbeOutcome {
        let Some(ref base) = self.connector_url else {
            return ProbeOutcome {
                result: ProbeResult::Fail,
                latency_ms: 0,
                detail: Some("connector_url not configured".to_string()),
            };
        };
        let started = Instant::now();
        let result = self.client.get(format!("{base}/healthz")).send().await;
        let latency_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(response) if response.status().is_success() => {
                ProbeOutcome { result: ProbeResult::Pass, latency_ms, detail: None }
            },
            Ok(response) => ProbeOutcome {
                result: ProbeResult::Fail,
                latency_ms,
                detail: Some(format!("healthz returned {}", response.status())),
            },
            Err(e) => ProbeOutcome {
                result: ProbeResult::Fail,
                latency_ms,
                detail: Some(e.to_string()),
            },
        }
    }
}

#[async_trait]
impl Prober for ConnectorProber {
    async fn probe(&self, kind: ProbeKind) -> ProbeOutcome {
        match kind {
            ProbeKind::Outbound | ProbeKind::Inbound => self.probe_connector().await,
            ProbeKind::Queue => {
                let depth = fleetwarden_core::telemetry::FleetStats::queue_depth(&*self.fleet);
                if depth <= QUEUE_DEPTH_THRESHOLD {
                    ProbeOutcome { result: ProbeResult::Pass, latency_ms: 0, detail: None }
                } else {
                    ProbeOutcome {
                        result: ProbeResult::Fail,
                        latency_ms: 0,
                        detail: Some(format!("queue depth {depth} over {QUEUE_DEPTH_THRESHOLD}")),
                    }
                }
            },
        }
    }
}

/// Delegates backfill execution to the connector.
pub struct ConnectorBackfillRunner {
    client: reqwest::Client,
    connector_url: Option<String>,
}

impl ConnectorBackfillRunner {
    pub fn new(connector_url: Option<String>) -> Self {
        Self { client: http_client(Duration::from_secs(600)), connector_url }
    }
}

#[async_trait]
impl BackfillRunner for ConnectorBackfillRunner {
    async fn run(&self, account_id: &str) -> Result<BackfillStats, String> {
        let Some(ref base) = self.connector_url else {
            return Err("connector_url not configured".to_string());
        };
        let url = format!("{base}/accounts/{account_id}/backfill");
        let response = self.client.post(&url).send().await.map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("connector returned {}", response.status()));
        }
        response.json::<BackfillStats>().await.map_err(|e| e.to_string())
    }
}

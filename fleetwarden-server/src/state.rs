//! Application state.
//!
//! One `Arc`-shared inner struct holds every long-lived component; the
//! axum handlers and the background loops all borrow from here.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use fleetwarden_core::alert::AlertDispatcher;
use fleetwarden_core::backfill::BackfillScheduler;
use fleetwarden_core::store::{DocumentStore, MemoryStore};
use fleetwarden_core::telemetry::TelemetryPipeline;
use fleetwarden_core::{FleetDirectory, FleetService};

use crate::config::ServerConfig;
use crate::connector::{
    ConnectorBackfillRunner, ConnectorProber, WebhookAlertChannel, WebhookTransport,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub(crate) inner: Arc<AppStateInner>,
}

pub struct AppStateInner {
    pub fleet: Arc<FleetService>,
    pub backfill: Arc<BackfillScheduler>,
    pub telemetry: Arc<TelemetryPipeline>,
    pub store: Arc<dyn DocumentStore>,
    pub instance_id: String,
    pub started_at_ms: i64,
}

impl AppState {
    /// Wire every component from config. The document store defaults to
    /// the in-memory implementation; a durable backend plugs in through
    /// the same trait.
    pub fn build(config: &ServerConfig, instance_id: String) -> Result<Self> {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());

        let connector_url =
            config.connector_url.clone().unwrap_or_else(|| "http://127.0.0.1:9100".to_string());
        let transport = Arc::new(WebhookTransport::new(connector_url.clone()));
        let fleet = FleetService::new(&config.fleet, transport);

        for proxy in &config.proxies {
            fleet.proxies().register(&proxy.proxy_id, &proxy.endpoint, proxy.sticky, proxy.enabled)?;
        }
        for account in &config.accounts {
            fleet.register_account(&account.account_id, account.age_class);
        }

        let backfill = BackfillScheduler::new(
            config.fleet.backfill.clone(),
            instance_id.clone(),
            Arc::clone(&store),
            Arc::new(ConnectorBackfillRunner::new(config.connector_url.clone())),
            FleetDirectory::new(Arc::clone(&fleet)),
        );

        let alerts = Arc::new(AlertDispatcher::new(
            Arc::new(WebhookAlertChannel::new(config.alert_webhook_url.clone())),
            Duration::from_millis(config.fleet.telemetry.alerts.throttle_ms),
        ));
        let telemetry = TelemetryPipeline::new(
            config.fleet.telemetry.clone(),
            instance_id.clone(),
            Arc::clone(&store),
            alerts,
            Arc::new(ConnectorProber::new(config.connector_url.clone(), Arc::clone(&fleet))),
            Arc::clone(&fleet) as Arc<dyn fleetwarden_core::telemetry::FleetStats>,
        );

        Ok(Self {
            inner: Arc::new(AppStateInner {
                fleet,
                backfill,
                telemetry,
                store,
                instance_id,
                started_at_ms: chrono::Utc::now().timestamp_millis(),
            }),
        })
    }

    /// Spawn the long-lived loops: proxy health checks, backfill ticks,
    /// and the telemetry pipeline.
    pub fn start_background_loops(&self) {
        self.inner.fleet.proxies().start_health_checker();
        self.inner.backfill.start();
        self.inner.telemetry.start();
    }

    pub fn fleet(&self) -> &Arc<FleetService> {
        &self.inner.fleet
    }

    pub fn backfill(&self) -> &Arc<BackfillScheduler> {
        &self.inner.backfill
    }

    pub fn telemetry(&self) -> &Arc<TelemetryPipeline> {
        &self.inner.telemetry
    }
}

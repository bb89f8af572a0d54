// src/events.rs

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::ledger::QuotaLedger;
use crate::model::{Request, RequestId};
use crate::reconciler::QuotaEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Created,
    Edited,
    Approved,
    Rejected,
    Cancelled,
    FlagsRefreshed,
}

/// Outcome of one committed mutation on one ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaEvent {
    pub kind: EventKind,
    pub request_id: Option<RequestId>,
    pub ledger: QuotaLedger,
    pub overdue_changed: bool,
    pub is_overdue_snapshot: bool,
}

impl QuotaEvent {
    pub(crate) fn for_request(kind: EventKind, request: &Request, before: &QuotaLedger, after: &QuotaLedger) -> Self {
        Self {
            kind,
            request_id: Some(request.id),
            ledger: after.clone(),
            overdue_changed: before.overdue() != after.overdue(),
            is_overdue_snapshot: request.is_overdue_snapshot,
        }
    }

    /// Whether still-pending requests in this bucket need their flags re-derived.
    pub fn releases_overdue(&self) -> bool {
        self.overdue_changed
            && matches!(
                self.kind,
                EventKind::Cancelled | EventKind::Rejected | EventKind::Edited
            )
    }
}

/// Sending half handed to the engine. Events go out after commit only.
///
/// Unbounded: the dispatcher itself triggers flag refreshes that publish
/// back into this channel.
#[derive(Clone)]
pub struct EventPublisher {
    tx: mpsc::UnboundedSender<QuotaEvent>,
}

impl EventPublisher {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<QuotaEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn publish(&self, events: Vec<QuotaEvent>) {
        for event in events {
            debug!(
                "Publishing {:?} event: {}, Request={:?}",
                event.kind,
                event.ledger.key(),
                event.request_id
            );
            if self.tx.send(event).is_err() {
                warn!("Event receiver dropped; remaining events discarded");
                return;
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Webhook request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Webhook returned status {0}")]
    Status(reqwest::StatusCode),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &QuotaEvent) -> Result<(), NotifyError>;
}

/// Writes each event to the log.
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, event: &QuotaEvent) -> Result<(), NotifyError> {
        info!(
            "Quota event {:?}: {}, Request={:?}, Consumed={}, Remaining={}, Overdue={}, OverdueChanged={}",
            event.kind,
            event.ledger.key(),
            event.request_id,
            event.ledger.consumed(),
            event.ledger.remaining(),
            event.ledger.overdue(),
            event.overdue_changed
        );
        Ok(())
    }
}

/// POSTs each event as JSON to a configured endpoint.
pub struct WebhookNotifier {
    http_client: Client,
    endpoint: Url,
}

impl WebhookNotifier {
    pub fn new(endpoint: Url) -> Result<Self, NotifyError> {
        let http_client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            http_client,
            endpoint,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &QuotaEvent) -> Result<(), NotifyError> {
        let response = self
            .http_client
            .post(self.endpoint.clone())
            .json(event)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(NotifyError::Status(status))
        }
    }
}

/// Drains the event channel: notify first, then refresh pending flags when a release changed overdue.
pub async fn run_event_dispatcher(
    mut rx: mpsc::UnboundedReceiver<QuotaEvent>,
    notifiers: Vec<Arc<dyn Notifier>>,
    engine: Arc<QuotaEngine>,
) {
    info!("Starting event dispatcher with {} notifier(s)", notifiers.len());
    while let Some(event) = rx.recv().await {
        for notifier in &notifiers {
            if let Err(e) = notifier.notify(&event).await {
                error!("Notifier failed for {}: {}", event.ledger.key(), e);
            }
        }
        if event.releases_overdue() {
            let key = event.ledger.key();
            match engine.refresh_pending_flags(&key).await {
                Ok(changed) => info!("Refreshed {} pending flag(s): {}", changed, key),
                Err(e) => error!("Pending flag refresh failed for {}: {}", key, e),
            }
        }
    }
    info!("Event channel closed; dispatcher exiting");
}

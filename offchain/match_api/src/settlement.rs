//! Hands match lifecycle events to the settlement side. Events are always
//! logged; with a webhook configured they are also POSTed as JSON.

use anyhow::Context;
use engine::{MatchLedger, SettlementEvent};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct SettlementForwarder {
    client: reqwest::Client,
    pub webhook: Option<String>,
}

impl SettlementForwarder {
    pub fn new(webhook: Option<String>) -> Self {
        let webhook = webhook.filter(|url| !url.trim().is_empty());
        Self { client: reqwest::Client::new(), webhook }
    }

    pub fn is_active(&self) -> bool {
        self.webhook.is_some()
    }

    /// Returns the webhook's status code, or `None` when running log-only.
    pub async fn deliver(&self, event: &SettlementEvent) -> anyhow::Result<Option<u16>> {
        let Some(url) = &self.webhook else {
            return Ok(None);
        };
        let resp = self
            .client
            .post(url)
            .json(event)
            .send()
            .await
            .with_context(|| format!("posting {} to {url}", event.session_id()))?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("settlement webhook answered {status}");
        }
        Ok(Some(status.as_u16()))
    }

    pub fn spawn(self, ledger: Arc<MatchLedger>) {
        let mut rx = ledger.subscribe_events();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => self.forward(event).await,
                    Err(RecvError::Lagged(n)) => {
                        warn!(target: "clash", skipped = n, "settlement forwarder lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    async fn forward(&self, event: SettlementEvent) {
        match &event {
            SettlementEvent::Finished(result) => info!(
                target: "clash",
                session = %result.session_id,
                winner = ?result.winner,
                external_ref = ?result.external_ref,
                "match result ready for settlement"
            ),
            other => debug!(target: "clash", session = other.session_id(), "settlement event"),
        }
        match self.deliver(&event).await {
            Ok(Some(status)) => debug!(target: "clash", session = event.session_id(), status, "settlement delivered"),
            Ok(None) => {}
            Err(e) => warn!(target: "clash", session = event.session_id(), error = %e, "settlement delivery failed"),
        }
    }
}

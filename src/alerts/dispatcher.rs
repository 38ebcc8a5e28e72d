use chrono::Utc;
use log::{error, info, warn};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::ledger::AlertLedger;
use super::transport::AlertTransport;
use crate::config::AlertingConfig;
use crate::messaging::DomainEvents;
use crate::models::{AlertEvent, Channel, DeliveryAttempt, DeliveryStatus, Recipient};
use crate::utils::KeyedLocks;

/// Delay before retry number `attempt` (1-based), with up to 50% jitter
pub fn backoff_delay(config: &AlertingConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let base = config
        .backoff_base_ms
        .saturating_mul(1u64 << exponent)
        .min(config.backoff_max_ms);
    let jitter = if base >= 2 {
        rand::thread_rng().gen_range(0..=base / 2)
    } else {
        0
    };
    Duration::from_millis(base.saturating_add(jitter).min(config.backoff_max_ms.max(base)))
}

/// At-least-once delivery with bounded retry.
///
/// Attempts for one alert run one at a time; an alert whose recipients cannot
/// all be reached is marked failed and raised to admins.
pub struct AlertDispatcher {
    config: AlertingConfig,
    transport: Arc<dyn AlertTransport>,
    ledger: Arc<AlertLedger>,
    events: Option<DomainEvents>,
    locks: KeyedLocks<Uuid>,
}

impl AlertDispatcher {
    pub fn new(config: AlertingConfig, transport: Arc<dyn AlertTransport>, ledger: Arc<AlertLedger>) -> Self {
        Self {
            config,
            transport,
            ledger,
            events: None,
            locks: KeyedLocks::new(),
        }
    }

    pub fn with_events(mut self, events: DomainEvents) -> Self {
        self.events = Some(events);
        self
    }

    pub fn ledger(&self) -> &Arc<AlertLedger> {
        &self.ledger
    }

    /// Deliver one channel, retrying with backoff. Returns the last error on exhaustion.
    async fn deliver(&self, alert: &AlertEvent, recipient: &Recipient, channel: Channel) -> Result<u32, String> {
        let max_attempts = self.config.max_delivery_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let outcome = self
                .transport
                .send(alert.id, recipient, &alert.message, channel)
                .await;
            let record = DeliveryAttempt {
                alert_id: alert.id,
                recipient: recipient.user_id,
                channel,
                attempt,
                succeeded: outcome.is_ok(),
                error: outcome.as_ref().err().map(|e| e.to_string()),
                at: Utc::now(),
            };
            if let Err(e) = self.ledger.add_attempt(record).await {
                error!("Failed to record delivery attempt for alert {}: {}", alert.id, e);
            }

            match outcome {
                Ok(()) => return Ok(attempt),
                Err(e) => {
                    warn!(
                        "Delivery of alert {} to {} via {} failed (attempt {}/{}): {}",
                        alert.id, recipient.name, channel, attempt, max_attempts, e
                    );
                    last_error = e.to_string();
                    if attempt < max_attempts {
                        tokio::time::sleep(backoff_delay(&self.config, attempt)).await;
                    }
                }
            }
        }
        Err(last_error)
    }

    /// Record and deliver an emitted alert, returning its settled status
    pub async fn dispatch(&self, alert: AlertEvent) -> DeliveryStatus {
        let _guard = self.locks.lock(&alert.id).await;
        if self.ledger.get(alert.id).await.is_none() {
            self.ledger.record(alert.clone()).await;
            if let Some(events) = &self.events {
                events.alert_emitted(&alert).await;
            }
        }

        let mut failures = Vec::new();
        let mut attempts = 0;
        for recipient in &alert.recipients {
            let mut reached = false;
            let mut errors = Vec::new();
            for channel in &recipient.channels {
                match self.deliver(&alert, recipient, *channel).await {
                    Ok(used) => {
                        attempts += used as usize;
                        reached = true;
                    }
                    Err(e) => {
                        attempts += self.config.max_delivery_attempts as usize;
                        errors.push(format!("{}: {}", channel, e));
                    }
                }
            }
            if !reached {
                failures.push(if errors.is_empty() {
                    format!("{} has no delivery channel", recipient.name)
                } else {
                    format!("{} unreachable ({})", recipient.name, errors.join("; "))
                });
            }
        }
        if alert.recipients.is_empty() {
            failures.push("no recipient could be resolved".to_string());
        }

        if failures.is_empty() {
            self.settle(&alert, DeliveryStatus::Sent).await;
            info!(
                "Alert {} delivered to {} recipient(s) in {} attempt(s)",
                alert.id,
                alert.recipients.len(),
                attempts
            );
            if let Some(events) = &self.events {
                events.alert_delivered(&alert, attempts).await;
            }
            DeliveryStatus::Sent
        } else {
            let detail = format!(
                "Alert {} for incident {} failed: {}",
                alert.id,
                alert.incident_reference,
                failures.join(", ")
            );
            self.settle(&alert, DeliveryStatus::Failed).await;
            let issue = self.ledger.raise_issue(&alert, detail.clone()).await;
            error!("{} (operational issue {})", detail, issue.id);
            if let Some(events) = &self.events {
                events.alert_delivery_failed(&alert, &detail).await;
            }
            DeliveryStatus::Failed
        }
    }

    async fn settle(&self, alert: &AlertEvent, status: DeliveryStatus) {
        if let Err(e) = self.ledger.settle(alert.id, status).await {
            warn!("Alert {} not settled as {}: {}", alert.id, status, e);
        }
    }
}

use async_trait::async_trait;
use log::info;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::messaging::{EventMessage, EventType, MessageBroker};
use crate::models::{AlertMessage, Channel, Recipient};

/// Alert delivery interface; email / push transports live outside the core.
///
/// `Ok` is the delivery-status callback for a successful hand-off; an error is
/// treated as a failed attempt and retried by the dispatcher.
#[async_trait]
pub trait AlertTransport: Send + Sync {
    async fn send(
        &self,
        alert_id: Uuid,
        recipient: &Recipient,
        message: &AlertMessage,
        channel: Channel,
    ) -> Result<()>;
}

#[derive(Serialize)]
struct DeliveryRequest<'a> {
    alert_id: Uuid,
    recipient: &'a Recipient,
    message: &'a AlertMessage,
    channel: Channel,
}

/// Hands each delivery to the broker under `alert.deliver.<channel>`
pub struct AmqpAlertTransport {
    broker: Arc<MessageBroker>,
}

impl AmqpAlertTransport {
    pub fn new(broker: Arc<MessageBroker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl AlertTransport for AmqpAlertTransport {
    async fn send(
        &self,
        alert_id: Uuid,
        recipient: &Recipient,
        message: &AlertMessage,
        channel: Channel,
    ) -> Result<()> {
        let request = DeliveryRequest {
            alert_id,
            recipient,
            message,
            channel,
        };
        let event = EventMessage::new(EventType::AlertDeliver(channel), Some(alert_id), request)?;
        self.broker
            .publish_message(&event)
            .await
            .map_err(|e| Error::DeliveryFailure(format!("{} via {}: {}", recipient.name, channel, e)))
    }
}

/// Logs deliveries; used when no broker is configured
pub struct LogTransport;

#[async_trait]
impl AlertTransport for LogTransport {
    async fn send(
        &self,
        alert_id: Uuid,
        recipient: &Recipient,
        message: &AlertMessage,
        channel: Channel,
    ) -> Result<()> {
        info!(
            "ALERT {} -> {} ({}) via {}: {}",
            alert_id, recipient.name, recipient.role, channel, message.title
        );
        Ok(())
    }
}

use anyhow::Result;
use async_trait::async_trait;
use log::info;
use tokio::sync::Mutex;

use super::event::{EventMessage, EventType};

/// Destination for domain events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_event(&self, event: EventMessage) -> Result<()>;
}

/// Writes events to the log; used when no broker is configured
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish_event(&self, event: EventMessage) -> Result<()> {
        info!(
            "event {} [{}] {}",
            event.routing_key(),
            event.id,
            event.payload
        );
        Ok(())
    }
}

/// Keeps events in memory for inspection
#[derive(Default)]
pub struct MemoryPublisher {
    events: Mutex<Vec<EventMessage>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<EventMessage> {
        self.events.lock().await.clone()
    }

    pub async fn count(&self, event_type: &EventType) -> usize {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| &e.event_type == event_type)
            .count()
    }
}

#[async_trait]
impl EventPublisher for MemoryPublisher {
    async fn publish_event(&self, event: EventMessage) -> Result<()> {
        self.events.lock().await.push(event);
        Ok(())
    }
}

use crate::config::MessageBrokerConfig;
use crate::error::Error;
use crate::messaging::event::{EventMessage, EventType};
use crate::messaging::publisher::EventPublisher;
use anyhow::Result;
use async_trait::async_trait;
use deadpool_lapin::{Config, Manager, Pool};
use futures_util::stream::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions,
        QueueBindOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind,
};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Callback function type for event handling
pub type EventCallback = Arc<dyn Fn(EventMessage) -> Result<()> + Send + Sync>;

/// Message broker service trait
#[async_trait]
pub trait MessageBrokerTrait: Send + Sync {
    /// Publish an event
    async fn publish<T: Serialize + Send>(
        &self,
        event_type: EventType,
        source_id: Option<Uuid>,
        payload: T,
    ) -> Result<()>;

    /// Subscribe to an event type
    async fn subscribe(&self, event_type: EventType, callback: EventCallback) -> Result<String>;

    /// Subscribe to a routing pattern, e.g. `alert.#`
    async fn subscribe_pattern(&self, pattern: &str, callback: EventCallback) -> Result<String>;

    async fn unsubscribe(&self, subscription_id: &str) -> Result<()>;
}

/// RabbitMQ message broker implementation
pub struct MessageBroker {
    pool: Pool,
    config: MessageBrokerConfig,
    subscriptions: Arc<RwLock<HashMap<String, JoinHandle<()>>>>,
    /// Default publishing channel
    channel: Arc<Mutex<Option<Channel>>>,
}

fn unavailable(what: &str, err: impl std::fmt::Display) -> anyhow::Error {
    Error::ServiceUnavailable(format!("{}: {}", what, err)).into()
}

impl MessageBroker {
    pub async fn new(config: MessageBrokerConfig) -> Result<Self> {
        let timeout = Some(Duration::from_millis(config.timeout_ms));
        let pool_config = Config {
            url: Some(config.uri.clone()),
            pool: Some(deadpool_lapin::PoolConfig {
                max_size: config.pool_size as usize,
                queue_mode: deadpool::managed::QueueMode::Fifo,
                timeouts: deadpool::managed::Timeouts {
                    wait: timeout,
                    create: timeout,
                    recycle: timeout,
                },
            }),
            connection_properties: ConnectionProperties::default(),
        };
        let pool = pool_config.create_pool(Some(deadpool_lapin::Runtime::Tokio1))?;

        let broker = Self {
            pool,
            config,
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            channel: Arc::new(Mutex::new(None)),
        };
        broker.init().await?;
        Ok(broker)
    }

    /// Declare the event exchange and its dead letter exchange
    async fn init(&self) -> Result<()> {
        let conn = self.get_amqp_connection().await?;
        let channel = conn
            .create_channel()
            .await
            .map_err(|e| unavailable("Failed to create RabbitMQ channel", e))?;

        for exchange in [&self.config.exchange, &self.config.dead_letter_exchange] {
            channel
                .exchange_declare(
                    exchange,
                    ExchangeKind::Topic,
                    ExchangeDeclareOptions {
                        durable: true,
                        auto_delete: false,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| unavailable("Failed to declare exchange", e))?;
        }

        *self.channel.lock().await = Some(channel);
        info!("RabbitMQ message broker initialized on exchange {}", self.config.exchange);
        Ok(())
    }

    /// Get a pooled connection, retrying with the configured delay
    async fn get_connection(&self) -> Result<deadpool::managed::Object<Manager>> {
        let max_attempts = self.config.retry_attempts.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.pool.get().await {
                Ok(conn) => return Ok(conn),
                Err(err) if attempts < max_attempts => {
                    warn!(
                        "Failed to get RabbitMQ connection (attempt {}/{}): {}",
                        attempts, max_attempts, err
                    );
                    tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                }
                Err(err) => {
                    return Err(unavailable(
                        &format!("No RabbitMQ connection after {} attempts", attempts),
                        err,
                    ))
                }
            }
        }
    }

    async fn get_amqp_connection(&self) -> Result<Connection> {
        // Pool checkout proves the broker is reachable; channels live on a dedicated connection
        let _pooled = self.get_connection().await?;
        Connection::connect(&self.config.uri, ConnectionProperties::default())
            .await
            .map_err(|e| unavailable("Failed to create AMQP connection", e))
    }

    async fn get_channel(&self) -> Result<Channel> {
        let mut channel_guard = self.channel.lock().await;
        if let Some(channel) = &*channel_guard {
            if channel.status().connected() {
                return Ok(channel.clone());
            }
        }

        let conn = self.get_amqp_connection().await?;
        let channel = conn
            .create_channel()
            .await
            .map_err(|e| unavailable("Failed to create RabbitMQ channel", e))?;
        *channel_guard = Some(channel.clone());
        Ok(channel)
    }

    /// Publish an already built message under its routing key
    pub async fn publish_message(&self, event: &EventMessage) -> Result<()> {
        let message = serde_json::to_vec(event)?;
        let routing_key = event.routing_key();
        let channel = self.get_channel().await?;

        channel
            .basic_publish(
                &self.config.exchange,
                &routing_key,
                BasicPublishOptions::default(),
                &message,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_delivery_mode(2),
            )
            .await
            .map_err(|e| unavailable("Failed to publish message", e))?
            .await
            .map_err(|e| unavailable("Publish not confirmed", e))?;

        debug!("Published event {} with routing key {}", event.id, routing_key);
        Ok(())
    }

    async fn create_consumer_queue(&self, pattern: &str) -> Result<Consumer> {
        let channel = self.get_channel().await?;
        let queue_name = format!("campusguard.{}.{}", pattern.replace('.', "_"), Uuid::new_v4());

        let mut args = FieldTable::default();
        args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(self.config.dead_letter_exchange.clone().into()),
        );
        channel
            .queue_declare(
                &queue_name,
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..Default::default()
                },
                args,
            )
            .await
            .map_err(|e| unavailable("Failed to declare queue", e))?;
        channel
            .queue_bind(
                &queue_name,
                &self.config.exchange,
                pattern,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| unavailable("Failed to bind queue", e))?;
        debug!("Created queue {} for pattern {}", queue_name, pattern);

        channel
            .basic_consume(
                &queue_name,
                &format!("consumer-{}", Uuid::new_v4()),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| unavailable("Failed to create consumer", e))
    }

    async fn start_consumer(&self, pattern: &str, callback: EventCallback) -> Result<String> {
        let mut consumer = self.create_consumer_queue(pattern).await?;
        let subscription_id = Uuid::new_v4().to_string();
        let task_subscription = subscription_id.clone();
        let pattern = pattern.to_string();

        let handle = tokio::spawn(async move {
            info!("Started consumer for {} (subscription {})", pattern, task_subscription);

            while let Some(delivery) = consumer.next().await {
                let delivery = match delivery {
                    Ok(delivery) => delivery,
                    Err(e) => {
                        error!("Error receiving message: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                };

                match serde_json::from_slice::<EventMessage>(&delivery.data) {
                    Ok(event) => {
                        debug!("Received event {} ({})", event.event_type, event.id);
                        if let Err(e) = callback(event) {
                            error!("Error processing event: {}", e);
                        }
                    }
                    Err(e) => error!("Failed to parse event message: {}", e),
                }
                // Acked either way so a poison message cannot block the queue
                if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                    error!("Failed to acknowledge message: {}", e);
                }
            }

            info!("Consumer stopped for {} (subscription {})", pattern, task_subscription);
        });

        self.subscriptions
            .write()
            .await
            .insert(subscription_id.clone(), handle);
        Ok(subscription_id)
    }
}

#[async_trait]
impl MessageBrokerTrait for MessageBroker {
    async fn publish<T: Serialize + Send>(
        &self,
        event_type: EventType,
        source_id: Option<Uuid>,
        payload: T,
    ) -> Result<()> {
        let event = EventMessage::new(event_type, source_id, payload)?;
        self.publish_message(&event).await
    }

    async fn subscribe(&self, event_type: EventType, callback: EventCallback) -> Result<String> {
        let pattern = format!("{}.#", event_type);
        self.start_consumer(&pattern, callback).await
    }

    async fn subscribe_pattern(&self, pattern: &str, callback: EventCallback) -> Result<String> {
        self.start_consumer(pattern, callback).await
    }

    async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        match self.subscriptions.write().await.remove(subscription_id) {
            Some(handle) => {
                handle.abort();
                info!("Unsubscribed: {}", subscription_id);
                Ok(())
            }
            None => Err(Error::NotFound(format!("Subscription not found: {}", subscription_id)).into()),
        }
    }
}

#[async_trait]
impl EventPublisher for MessageBroker {
    async fn publish_event(&self, event: EventMessage) -> Result<()> {
        self.publish_message(&event).await
    }
}

/// Create a message broker service
pub async fn create_message_broker(config: MessageBrokerConfig) -> Result<Arc<MessageBroker>> {
    Ok(Arc::new(MessageBroker::new(config).await?))
}

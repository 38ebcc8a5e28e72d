pub mod broker;
pub mod event;
pub mod incident_events;
pub mod publisher;
#[cfg(test)]
mod tests;

pub use broker::{create_message_broker, MessageBroker, MessageBrokerTrait};
pub use event::{EventMessage, EventType};
pub use incident_events::DomainEvents;
pub use publisher::{EventPublisher, LogPublisher, MemoryPublisher};

//! # Bean Router Core
//!
//! An admission-controlled message publisher: takes a named application
//! value, encodes it into a broker message and publishes it to a queue while
//! keeping the queue from growing without bound.
//!
//! ## Features
//!
//! - **Pluggable Encoding**: Text, typed map and serialized object bodies
//! - **Correlation Ids**: `${name}` templates rendered from the current values
//! - **Backpressure**: Publishes wait while the queue is at its high-water mark
//! - **Ordered Lifecycle**: Connection, session and producer are released in
//!   reverse order on every exit path
//! - **Broker Agnostic**: Async broker traits with an in-process broker and an
//!   MQTT bridge included
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use bean_router_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let broker = MemoryBroker::new();
//!     let directory = StaticDirectory::new();
//!     directory
//!         .bind_connection_factory("ConnectionFactory", Arc::new(broker.connection_factory()))
//!         .bind_destination(broker.queue("orders"));
//!
//!     let config = RouterConfig::new("order", "orders")
//!         .with_correlation_pattern("order-${order}")
//!         .with_high_water_mark(50);
//!     let router = Router::new(config, Arc::new(directory))?;
//!     router.initialize().await?;
//!
//!     let mut values = BeanContext::new();
//!     values.insert("order", "42");
//!     router.publish(&values).await?;
//!
//!     router.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Custom Encoding
//!
//! Implement [`MessageEncoder`] and install it with [`Router::with_encoder`]:
//!
//! ```rust
//! use bean_router_core::{EncodingError, MessageBody, MessageEncoder, MessageType, ValueLookup};
//!
//! #[derive(Debug)]
//! struct UppercaseEncoder;
//!
//! impl MessageEncoder for UppercaseEncoder {
//!     fn message_type(&self) -> MessageType {
//!         MessageType::Text
//!     }
//!
//!     fn encode(&self, key: &str, values: &dyn ValueLookup) -> Result<MessageBody, EncodingError> {
//!         let value = values
//!             .get(key)
//!             .ok_or_else(|| EncodingError::MissingValue { key: key.to_string() })?;
//!         Ok(MessageBody::Text(value.to_string().to_uppercase()))
//!     }
//! }
//! ```

#![warn(missing_docs)]

// Core modules
pub mod admission;
pub mod broker;
pub mod config;
pub mod connection;
pub mod correlation;
pub mod directory;
pub mod encoder;
pub mod error;
pub mod message;
pub mod router;
pub mod value;

#[cfg(test)]
mod correlation_tests;
#[cfg(test)]
mod router_tests;

// === Core Public API ===
pub use router::Router;
pub use config::{
	AdmissionConfig, ConnectionSettings, ExecutionPhase, RouterConfig,
};
pub use error::{ConfigurationError, RouterError, RouterResult};
pub use value::{BeanContext, BeanObject, SerializableBean, Value, ValueLookup};

// Encoding and correlation
pub use correlation::{
	CorrelationAssigner, CorrelationAssignmentError, CorrelationTemplate,
	PlaceholderRenderer, TemplateError, TemplateRenderer,
};
pub use encoder::{
	EncodingError, MapEncoder, MessageEncoder, MessageType, ObjectEncoder,
	ObjectPayload, TextEncoder,
};
pub use message::{
	DeliveryMode, DeliverySettings, MapBody, MapField, MessageBody,
	OutgoingMessage,
};

// === Advanced API ===
pub use admission::{
	Admission, AdmissionController, AdmissionError, InterruptHandle,
};
pub use broker::memory::{FaultPoint, MemoryBroker, OpenHandles};
pub use broker::mqtt::{MqttConnectionFactory, MqttDirectory, WireEnvelope};
pub use broker::{
	AcknowledgeMode, BrokerError, Credentials, Destination, DestinationKind,
};
pub use connection::{ConnectionResourceManager, LifecycleState, ResourceHandle};
pub use directory::{
	Directory, DirectoryEntry, DirectoryProperties, NamingError, StaticDirectory,
};
// Re-export rumqttc types for bridge configuration
pub use rumqttc::MqttOptions;

/// Prelude module for convenient imports
///
/// Essential types for wiring and driving a router:
///
/// ```rust
/// use bean_router_core::prelude::*;
/// ```
pub mod prelude {
	pub use crate::{
		AcknowledgeMode, AdmissionConfig, BeanContext, Credentials,
		DeliveryMode, Destination, Directory, DirectoryProperties,
		ExecutionPhase, MemoryBroker, MessageType, Router, RouterConfig,
		RouterError, RouterResult, StaticDirectory, Value, ValueLookup,
	};
}

//! # Bean Router
//!
//! Publishes values produced by a processing pipeline to a message broker
//! queue, one message per invocation, and applies backpressure so a slow
//! consumer never lets the queue grow without bound.
//!
//! ## Features
//!
//! - **Three Encodings**: Text, typed map or serialized object messages
//! - **Correlation Templates**: `batch-${batch}-${order.id}` rendered per publish
//! - **Admission Control**: Waits while the queue depth is at the high-water
//!   mark, fails after a configurable timeout
//! - **Resource Safety**: No connection, session or producer outlives a failed
//!   start-up or a close
//! - **Directory Lookup**: Connection factories and destinations resolved by
//!   name, with provider properties from code, a file or both
//! - **Structured Logging**: `tracing` events for every lifecycle step
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use bean_router::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     bean_router::tracing_setup::setup(Some("info"));
//!
//!     let broker = MemoryBroker::new();
//!     let directory = StaticDirectory::new();
//!     directory
//!         .bind_connection_factory("ConnectionFactory", Arc::new(broker.connection_factory()))
//!         .bind_destination(broker.queue("invoices"));
//!
//!     let router = Router::new(
//!         RouterConfig::new("invoice", "invoices").with_message_type(MessageType::Map),
//!         Arc::new(directory),
//!     )?;
//!     router.on_init().await?;
//!
//!     let mut invoice = std::collections::BTreeMap::new();
//!     invoice.insert("number".to_string(), Value::from(1001_i64));
//!     invoice.insert("paid".to_string(), Value::from(false));
//!
//!     let mut values = BeanContext::new();
//!     values.insert("invoice", invoice);
//!     router.visit_after(&values).await?;
//!
//!     router.on_destroy().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! A [`RouterConfig`] can be built in code, parsed from JSON with
//! [`RouterConfig::from_json`] or assembled from flat string parameters with
//! [`RouterConfig::from_params`]. Durations are expressed in milliseconds.

#![warn(missing_docs)]

pub mod tracing_setup;

pub use bean_router_core::*;

/// Result type alias for router operations
pub type Result<T> = std::result::Result<T, RouterError>;

/// Error types used throughout the library
///
/// ```rust
/// use bean_router::errors::*;
/// ```
pub mod errors {
	//! All error types used in the library

	pub use crate::{
		AdmissionError, BrokerError, ConfigurationError,
		CorrelationAssignmentError, EncodingError, NamingError, RouterError,
		TemplateError,
	};
	pub use bean_router_core::message::MessageError;
}

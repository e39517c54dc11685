//! The admission-controlled publisher.
//!
//! A [`Router`] publishes one configured value per call: it encodes the
//! value, assigns the correlation id, waits for the destination to drop
//! below its high-water mark and hands the message to its producer.

use std::sync::Arc;

use arcstr::ArcStr;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::admission::{AdmissionController, AdmissionError, InterruptHandle};
use crate::config::{ExecutionPhase, RouterConfig};
use crate::connection::{ConnectionResourceManager, LifecycleState};
use crate::correlation::{CorrelationAssigner, TemplateRenderer};
use crate::directory::Directory;
use crate::encoder::MessageEncoder;
use crate::error::{ConfigurationError, RouterError, RouterResult};
use crate::message::OutgoingMessage;
use crate::value::ValueLookup;

/// Publishes a named value to a broker destination with backpressure.
///
/// Publishes through one router are serialized and reach the destination in
/// call order. A router can be shared behind an [`Arc`].
#[derive(Debug)]
pub struct Router {
	config: RouterConfig,
	value_key: ArcStr,
	destination_name: ArcStr,
	encoder: Box<dyn MessageEncoder>,
	correlation: CorrelationAssigner,
	admission: AdmissionController,
	directory: Arc<dyn Directory>,
	resources: Mutex<ConnectionResourceManager>,
}

impl Router {
	/// Validates `config` and builds a router resolving names through
	/// `directory`. No broker resources are acquired until
	/// [`Router::initialize`].
	pub fn new(
		config: RouterConfig,
		directory: Arc<dyn Directory>,
	) -> Result<Self, ConfigurationError> {
		config.validate()?;
		let value_key = ArcStr::from(config.value_key().unwrap_or_default());
		let destination_name =
			ArcStr::from(config.destination_name().unwrap_or_default());
		let correlation =
			CorrelationAssigner::new(config.correlation_pattern.as_deref())?;

		Ok(Self {
			value_key,
			destination_name,
			encoder: config.message_type.encoder(),
			correlation,
			admission: AdmissionController::new(config.admission),
			directory,
			resources: Mutex::new(ConnectionResourceManager::new()),
			config,
		})
	}

	/// Replaces the encoder chosen by the configured message type.
	pub fn with_encoder(mut self, encoder: Box<dyn MessageEncoder>) -> Self {
		self.encoder = encoder;
		self
	}

	/// Renders the correlation pattern with a custom template engine.
	pub fn with_template_renderer(
		mut self,
		renderer: Arc<dyn TemplateRenderer>,
	) -> Result<Self, ConfigurationError> {
		self.correlation = CorrelationAssigner::with_renderer(
			self.config.correlation_pattern.as_deref(),
			renderer,
		)?;
		Ok(self)
	}

	/// The validated configuration.
	pub fn config(&self) -> &RouterConfig {
		&self.config
	}

	/// Key of the published value.
	pub fn value_key(&self) -> &str {
		&self.value_key
	}

	/// Name of the destination.
	pub fn destination_name(&self) -> &str {
		&self.destination_name
	}

	/// Lifecycle state of the broker resources.
	pub async fn state(&self) -> LifecycleState {
		self.resources.lock().await.state()
	}

	/// Handle that ends any admission wait in progress.
	pub fn interrupt_handle(&self) -> InterruptHandle {
		self.admission.interrupt_handle()
	}

	/// Acquires the broker resources. Must succeed before publishing.
	pub async fn initialize(&self) -> RouterResult<()> {
		let mut resources = self.resources.lock().await;
		resources
			.initialize(&self.config, self.directory.as_ref())
			.await?;
		info!(
			value_key = %self.value_key,
			destination = %self.destination_name,
			message_type = %self.encoder.message_type(),
			"Router initialized"
		);
		Ok(())
	}

	/// Start-up hook of the host pipeline.
	pub async fn on_init(&self) -> RouterResult<()> {
		self.initialize().await
	}

	/// Whether populating `key` concerns this router. Matches on prefix, so
	/// `order.id` is consumed by a router of `order`.
	pub fn consumes(&self, key: &str) -> bool {
		key.starts_with(self.value_key.as_str())
	}

	/// Publishes when configured for [`ExecutionPhase::Before`]. Returns
	/// whether a message was sent.
	pub async fn visit_before(&self, values: &dyn ValueLookup) -> RouterResult<bool> {
		self.visit(ExecutionPhase::Before, values).await
	}

	/// Publishes when configured for [`ExecutionPhase::After`]. Returns
	/// whether a message was sent.
	pub async fn visit_after(&self, values: &dyn ValueLookup) -> RouterResult<bool> {
		self.visit(ExecutionPhase::After, values).await
	}

	async fn visit(
		&self,
		phase: ExecutionPhase,
		values: &dyn ValueLookup,
	) -> RouterResult<bool> {
		if self.config.execution_phase != phase {
			return Ok(false);
		}
		self.publish(values).await.map(|()| true)
	}

	/// Encodes the configured value from `values` and sends it.
	///
	/// Fails without sending when the value is missing or cannot be encoded,
	/// when the correlation id cannot be assigned, or when the destination
	/// stays at or above its high-water mark until the timeout. Nothing is
	/// retried.
	pub async fn publish(&self, values: &dyn ValueLookup) -> RouterResult<()> {
		let manager = self.resources.lock().await;
		let resources = manager.resources().ok_or(RouterError::NotReady {
			state: manager.state(),
		})?;

		let body = self.encoder.encode(&self.value_key, values)?;
		let message = self
			.correlation
			.assign(OutgoingMessage::new(body), values)?;

		let session = resources.session();
		let destination = resources.destination();
		match self.admission.await_capacity(session, destination).await {
			| Ok(admission) => {
				debug!(destination = %destination, ?admission, "Publish admitted");
			}
			| Err(AdmissionError::TimedOut { depth }) => {
				return Err(RouterError::BackpressureTimeout {
					destination: destination.name().to_string(),
					high_water_mark: self.config.admission.high_water_mark,
					timeout: self.config.admission.timeout,
					depth,
				});
			}
			| Err(AdmissionError::Inspection(source)) => {
				return Err(RouterError::AdmissionCheck {
					destination: destination.name().to_string(),
					source,
				});
			}
		}

		let correlation_id = message.correlation_id().map(str::to_string);
		let publish_error = |source| RouterError::Publish {
			destination: destination.name().to_string(),
			source,
		};
		let sent = resources.producer().send(message).await;
		let sent = match sent {
			| Ok(()) if session.is_transacted() => session.commit().await,
			| other => other,
		};
		if let Err(source) = sent {
			if session.is_transacted() {
				if let Err(e) = session.rollback().await {
					warn!(error = %e, "Failed to roll back session after send failure");
				}
			}
			return Err(publish_error(source));
		}

		debug!(
			destination = %destination,
			correlation_id = correlation_id.as_deref(),
			"Message sent"
		);
		Ok(())
	}

	/// Releases the broker resources. Shuts the admission controller down
	/// first, so a publish in flight skips or ends its backpressure wait
	/// instead of holding the router open until the timeout. Idempotent;
	/// failures are logged.
	pub async fn close(&self) {
		self.admission.interrupt_handle().shut_down();
		self.resources.lock().await.close().await;
	}

	/// Shutdown hook of the host pipeline. Safe after a failed start-up.
	pub async fn on_destroy(&self) {
		self.close().await;
	}
}

//! Broker resource lifecycle
//!
//! [`ConnectionResourceManager`] owns the connection, session and producer
//! a router publishes through. They are acquired in that order during
//! `initialize` and released in reverse order, both when a later step fails
//! and on `close`.

use std::fmt;

use tracing::{debug, error, info, warn};

use crate::broker::{
	Connection, ConnectionFactory, Destination, MessageProducer, Session,
};
use crate::config::RouterConfig;
use crate::directory::{Directory, DirectoryEntry};
use crate::error::ConfigurationError;

/// Lifecycle of a [`ConnectionResourceManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
	/// Nothing acquired yet
	Uninitialized,
	/// `initialize` in progress
	Initializing,
	/// Resources acquired, publishing allowed
	Ready,
	/// `close` in progress
	Closing,
	/// Resources released
	Closed,
	/// `initialize` failed; whatever was acquired has been released
	Failed,
}

impl fmt::Display for LifecycleState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			| LifecycleState::Uninitialized => "UNINITIALIZED",
			| LifecycleState::Initializing => "INITIALIZING",
			| LifecycleState::Ready => "READY",
			| LifecycleState::Closing => "CLOSING",
			| LifecycleState::Closed => "CLOSED",
			| LifecycleState::Failed => "FAILED",
		})
	}
}

/// The connection, session and producer of one router.
pub struct ResourceHandle {
	connection: Box<dyn Connection>,
	session: Box<dyn Session>,
	producer: Box<dyn MessageProducer>,
	destination: Destination,
}

impl ResourceHandle {
	/// The open connection.
	pub fn connection(&self) -> &dyn Connection {
		self.connection.as_ref()
	}

	/// The session the producer belongs to.
	pub fn session(&self) -> &dyn Session {
		self.session.as_ref()
	}

	/// The producer bound to [`ResourceHandle::destination`].
	pub fn producer(&self) -> &dyn MessageProducer {
		self.producer.as_ref()
	}

	/// The resolved destination.
	pub fn destination(&self) -> &Destination {
		&self.destination
	}
}

impl fmt::Debug for ResourceHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ResourceHandle")
			.field("destination", &self.destination)
			.field("transacted", &self.session.is_transacted())
			.finish_non_exhaustive()
	}
}

/// Acquires and releases the broker resources of one router.
#[derive(Debug)]
pub struct ConnectionResourceManager {
	state: LifecycleState,
	resources: Option<ResourceHandle>,
}

impl Default for ConnectionResourceManager {
	fn default() -> Self {
		Self::new()
	}
}

impl ConnectionResourceManager {
	/// Creates a manager holding nothing.
	pub fn new() -> Self {
		Self {
			state: LifecycleState::Uninitialized,
			resources: None,
		}
	}

	/// Current lifecycle state.
	pub fn state(&self) -> LifecycleState {
		self.state
	}

	/// The acquired resources; `None` unless the manager is ready.
	pub fn resources(&self) -> Option<&ResourceHandle> {
		match self.state {
			| LifecycleState::Ready => self.resources.as_ref(),
			| _ => None,
		}
	}

	/// Resolves the destination and connection factory through `directory`,
	/// then opens a connection, one session and one producer and applies the
	/// configured delivery settings.
	///
	/// On failure everything acquired so far is released, the manager moves
	/// to [`LifecycleState::Failed`] and the original error is returned.
	pub async fn initialize(
		&mut self,
		config: &RouterConfig,
		directory: &dyn Directory,
	) -> Result<(), ConfigurationError> {
		if self.state != LifecycleState::Uninitialized {
			return Err(ConfigurationError::Lifecycle {
				operation: "initialize",
				state: self.state,
			});
		}
		self.state = LifecycleState::Initializing;

		match Self::acquire(config, directory).await {
			| Ok(handle) => {
				info!(destination = %handle.destination, "Broker connection started");
				self.resources = Some(handle);
				self.state = LifecycleState::Ready;
				Ok(())
			}
			| Err(e) => {
				error!(error = %e, "Failed to initialize broker resources");
				self.state = LifecycleState::Failed;
				Err(e)
			}
		}
	}

	async fn acquire(
		config: &RouterConfig,
		directory: &dyn Directory,
	) -> Result<ResourceHandle, ConfigurationError> {
		let destination_name = config.destination_name().ok_or(
			ConfigurationError::MissingSetting {
				name: "destination_name",
			},
		)?;
		let properties = config
			.directory
			.to_properties(directory.default_properties())?;

		let destination =
			match lookup(directory, destination_name, &properties).await? {
				| DirectoryEntry::Destination(destination) => destination,
				| other => {
					return Err(ConfigurationError::WrongEntryKind {
						name: destination_name.to_string(),
						expected: "destination",
						found: other.kind_name(),
					});
				}
			};
		let factory_name = config.connection.factory_name.as_str();
		let factory = match lookup(directory, factory_name, &properties).await? {
			| DirectoryEntry::ConnectionFactory(factory) => factory,
			| other => {
				return Err(ConfigurationError::WrongEntryKind {
					name: factory_name.to_string(),
					expected: "connection factory",
					found: other.kind_name(),
				});
			}
		};

		let connection = open_connection(factory.as_ref(), config, &destination).await?;
		match Self::open_session(connection.as_ref(), config, &destination).await {
			| Ok((session, producer)) => Ok(ResourceHandle {
				connection,
				session,
				producer,
				destination,
			}),
			| Err(e) => {
				release(connection.as_ref(), None, None).await;
				Err(e)
			}
		}
	}

	/// Opens the session and producer, then starts the connection. Releases
	/// the session and producer if any of these steps fail.
	async fn open_session(
		connection: &dyn Connection,
		config: &RouterConfig,
		destination: &Destination,
	) -> Result<(Box<dyn Session>, Box<dyn MessageProducer>), ConfigurationError> {
		let settings = &config.connection;
		let session = connection
			.create_session(settings.transacted, settings.acknowledge_mode)
			.await
			.map_err(|e| ConfigurationError::resource("create session", destination.name().as_str(), e))?;

		let producer = match open_producer(session.as_ref(), config, destination).await {
			| Ok(producer) => producer,
			| Err(e) => {
				close_session(session.as_ref()).await;
				return Err(e);
			}
		};

		if let Err(e) = connection.start().await {
			close_producer(producer.as_ref()).await;
			close_session(session.as_ref()).await;
			return Err(ConfigurationError::resource(
				"start connection",
				destination.name().as_str(),
				e,
			));
		}
		Ok((session, producer))
	}

	/// Stops the connection, then closes the producer, the session and the
	/// connection. Every step is attempted even if an earlier one fails;
	/// failures are logged and never returned.
	pub async fn close(&mut self) {
		match self.state {
			| LifecycleState::Closed | LifecycleState::Closing => {
				debug!("Broker resources already closed");
				return;
			}
			| LifecycleState::Initializing => {
				warn!("Closing broker resources while initialization is in progress");
			}
			| _ => {}
		}
		self.state = LifecycleState::Closing;

		if let Some(handle) = self.resources.take() {
			if let Err(e) = handle.connection.stop().await {
				warn!(error = %e, "Failed to stop connection");
			}
			release(
				handle.connection.as_ref(),
				Some(handle.session.as_ref()),
				Some(handle.producer.as_ref()),
			)
			.await;
			info!(destination = %handle.destination, "Broker resources released");
		}
		self.state = LifecycleState::Closed;
	}
}

impl Drop for ConnectionResourceManager {
	fn drop(&mut self) {
		if self.resources.is_some() {
			error!(
				"ConnectionResourceManager dropped without calling close(). \
				 Please call close() and await its completion before dropping."
			);
		}
	}
}

async fn lookup(
	directory: &dyn Directory,
	name: &str,
	properties: &std::collections::BTreeMap<String, String>,
) -> Result<DirectoryEntry, ConfigurationError> {
	directory
		.lookup(name, properties)
		.await
		.map_err(|source| ConfigurationError::Naming {
			name: name.to_string(),
			source,
		})
}

async fn open_connection(
	factory: &dyn ConnectionFactory,
	config: &RouterConfig,
	destination: &Destination,
) -> Result<Box<dyn Connection>, ConfigurationError> {
	factory
		.create_connection(config.connection.credentials.as_ref())
		.await
		.map_err(|e| ConfigurationError::resource("open connection", destination.name().as_str(), e))
}

async fn open_producer(
	session: &dyn Session,
	config: &RouterConfig,
	destination: &Destination,
) -> Result<Box<dyn MessageProducer>, ConfigurationError> {
	let mut producer = session
		.create_producer(destination)
		.await
		.map_err(|e| ConfigurationError::resource("create producer", destination.name().as_str(), e))?;
	if let Err(e) = producer.apply_settings(config.connection.delivery) {
		close_producer(producer.as_ref()).await;
		return Err(ConfigurationError::resource(
			"apply delivery settings",
			destination.name().as_str(),
			e,
		));
	}
	Ok(producer)
}

/// Closes whatever was acquired, innermost first.
async fn release(
	connection: &dyn Connection,
	session: Option<&dyn Session>,
	producer: Option<&dyn MessageProducer>,
) {
	if let Some(producer) = producer {
		close_producer(producer).await;
	}
	if let Some(session) = session {
		close_session(session).await;
	}
	if let Err(e) = connection.close().await {
		warn!(error = %e, "Failed to close connection");
	}
}

async fn close_producer(producer: &dyn MessageProducer) {
	if let Err(e) = producer.close().await {
		warn!(error = %e, "Failed to close message producer");
	}
}

async fn close_session(session: &dyn Session) {
	if let Err(e) = session.close().await {
		warn!(error = %e, "Failed to close session");
	}
}

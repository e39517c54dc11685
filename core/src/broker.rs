//! Broker client abstraction
//!
//! The router talks to a queue broker through these object-safe traits:
//! a [`ConnectionFactory`] opens a [`Connection`], which opens a
//! [`Session`], which creates a [`MessageProducer`] bound to a
//! [`Destination`] and, for inspectable destinations, a [`QueueBrowser`].
//!
//! Two implementations ship with the crate: an in-process broker
//! ([`memory`]) and a bridge onto MQTT ([`mqtt`]).

pub mod error;
pub mod memory;
pub mod mqtt;

use std::fmt;
use std::str::FromStr;

use arcstr::ArcStr;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use error::{BrokerError, BrokerResult};

use crate::message::{DeliverySettings, OutgoingMessage};

/// Whether a destination is point-to-point or publish/subscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DestinationKind {
	/// Point-to-point queue with an inspectable depth
	Queue,
	/// Publish/subscribe topic
	Topic,
}

/// A named broker destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
	name: ArcStr,
	kind: DestinationKind,
}

impl Destination {
	/// A queue named `name`.
	pub fn queue(name: impl Into<ArcStr>) -> Self {
		Self {
			name: name.into(),
			kind: DestinationKind::Queue,
		}
	}

	/// A topic named `name`.
	pub fn topic(name: impl Into<ArcStr>) -> Self {
		Self {
			name: name.into(),
			kind: DestinationKind::Topic,
		}
	}

	/// Destination name.
	pub fn name(&self) -> &ArcStr {
		&self.name
	}

	/// Destination kind.
	pub fn kind(&self) -> DestinationKind {
		self.kind
	}

	/// Whether this is a queue.
	pub fn is_queue(&self) -> bool {
		self.kind == DestinationKind::Queue
	}
}

impl fmt::Display for Destination {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.name)
	}
}

/// Principal and credential used to open an authenticated connection.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
	principal: String,
	credential: String,
}

impl Credentials {
	/// Creates a credential pair.
	pub fn new(principal: impl Into<String>, credential: impl Into<String>) -> Self {
		Self {
			principal: principal.into(),
			credential: credential.into(),
		}
	}

	/// Security principal (user name).
	pub fn principal(&self) -> &str {
		&self.principal
	}

	/// Security credential (password).
	pub fn credential(&self) -> &str {
		&self.credential
	}
}

impl fmt::Debug for Credentials {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Credentials")
			.field("principal", &self.principal)
			.field("credential", &"***")
			.finish()
	}
}

/// Acknowledge mode of a session.
#[derive(
	Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AcknowledgeMode {
	/// Session acknowledges automatically
	#[default]
	AutoAcknowledge,
	/// Client acknowledges explicitly
	ClientAcknowledge,
	/// Lazy acknowledgement, duplicates tolerated
	DupsOkAcknowledge,
}

impl AcknowledgeMode {
	/// Parses a mode, falling back to [`AcknowledgeMode::AutoAcknowledge`]
	/// for unknown input.
	pub fn parse_lenient(s: &str) -> Self {
		s.parse().unwrap_or_else(|_| {
			debug!(
				mode = s,
				"Invalid acknowledge mode, using AUTO_ACKNOWLEDGE"
			);
			AcknowledgeMode::AutoAcknowledge
		})
	}
}

impl FromStr for AcknowledgeMode {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_uppercase().as_str() {
			| "AUTO_ACKNOWLEDGE" | "AUTO" => Ok(AcknowledgeMode::AutoAcknowledge),
			| "CLIENT_ACKNOWLEDGE" | "CLIENT" => {
				Ok(AcknowledgeMode::ClientAcknowledge)
			}
			| "DUPS_OK_ACKNOWLEDGE" | "DUPS_OK" | "DUPS-OK" => {
				Ok(AcknowledgeMode::DupsOkAcknowledge)
			}
			| other => Err(format!("unknown acknowledge mode '{other}'")),
		}
	}
}

impl fmt::Display for AcknowledgeMode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			| AcknowledgeMode::AutoAcknowledge => f.write_str("AUTO_ACKNOWLEDGE"),
			| AcknowledgeMode::ClientAcknowledge => {
				f.write_str("CLIENT_ACKNOWLEDGE")
			}
			| AcknowledgeMode::DupsOkAcknowledge => {
				f.write_str("DUPS_OK_ACKNOWLEDGE")
			}
		}
	}
}

/// Opens connections to a broker.
#[async_trait]
pub trait ConnectionFactory: fmt::Debug + Send + Sync {
	/// Opens a connection, authenticated when `credentials` is given.
	async fn create_connection(
		&self,
		credentials: Option<&Credentials>,
	) -> BrokerResult<Box<dyn Connection>>;
}

/// An open broker connection.
#[async_trait]
pub trait Connection: Send + Sync {
	/// Opens a session on this connection.
	async fn create_session(
		&self,
		transacted: bool,
		acknowledge_mode: AcknowledgeMode,
	) -> BrokerResult<Box<dyn Session>>;

	/// Starts delivery.
	async fn start(&self) -> BrokerResult<()>;

	/// Pauses delivery.
	async fn stop(&self) -> BrokerResult<()>;

	/// Releases the connection.
	async fn close(&self) -> BrokerResult<()>;
}

/// A single-threaded context for producing messages.
#[async_trait]
pub trait Session: Send + Sync {
	/// Creates a producer bound to `destination`.
	async fn create_producer(
		&self,
		destination: &Destination,
	) -> BrokerResult<Box<dyn MessageProducer>>;

	/// Creates a browser over the pending messages of `destination`.
	///
	/// Returns `None` when the destination cannot be inspected.
	async fn create_browser(
		&self,
		destination: &Destination,
	) -> BrokerResult<Option<Box<dyn QueueBrowser>>>;

	/// Whether sends are buffered until [`Session::commit`].
	fn is_transacted(&self) -> bool;

	/// Makes buffered sends visible.
	async fn commit(&self) -> BrokerResult<()>;

	/// Discards buffered sends.
	async fn rollback(&self) -> BrokerResult<()>;

	/// Releases the session.
	async fn close(&self) -> BrokerResult<()>;
}

/// Sends messages to one destination.
#[async_trait]
pub trait MessageProducer: Send + Sync {
	/// Sets priority, time-to-live and persistence for later sends.
	fn apply_settings(&mut self, settings: DeliverySettings) -> BrokerResult<()>;

	/// Sends `message`, stamping it with the producer's settings.
	async fn send(&self, message: OutgoingMessage) -> BrokerResult<()>;

	/// Releases the producer.
	async fn close(&self) -> BrokerResult<()>;
}

/// Read-only view over the pending messages of a queue.
#[async_trait]
pub trait QueueBrowser: Send + Sync {
	/// Counts the pending messages by enumerating them.
	async fn depth(&self) -> BrokerResult<usize>;

	/// Releases the browser.
	async fn close(&self) -> BrokerResult<()>;
}

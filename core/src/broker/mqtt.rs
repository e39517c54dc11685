//! MQTT bridge
//!
//! Publishes router messages onto an MQTT broker through `rumqttc`. Each
//! destination maps to a topic of the same name and every message travels as
//! a bincode [`WireEnvelope`]. MQTT has no queue inspection and no
//! transactions, so browsers are never offered and transacted sessions are
//! refused.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use arcstr::ArcStr;
use async_trait::async_trait;
use bincode::{Decode, Encode};
use parking_lot::Mutex;
use rumqttc::Packet;
use rumqttc::{AsyncClient, ConnectReturnCode, EventLoop, MqttOptions, QoS};
use rumqttc::{Event::Incoming, Event::Outgoing};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, warn};

use super::{
	AcknowledgeMode, BrokerError, BrokerResult, Connection, ConnectionFactory,
	Credentials, Destination, MessageProducer, QueueBrowser, Session,
};
use crate::directory::{
	Directory, DirectoryEntry, NamingError, PROVIDER_URL,
};
use crate::message::{
	DeliveryMode, DeliverySettings, MessageBody, OutgoingMessage,
};

/// Longest topic name MQTT accepts.
pub const MAX_TOPIC_LEN: usize = 65535;

/// Tuning of the bridge's client.
#[derive(Debug, Clone)]
pub struct MqttBridgeSettings {
	/// Capacity of the rumqttc request channel
	pub event_loop_capacity: usize,
	/// How long to wait for the broker's ConnAck
	pub connection_timeout: Duration,
	/// Consecutive event-loop failures after which the connection is abandoned
	pub max_event_loop_errors: u32,
	/// Pause before polling again after an event-loop failure
	pub retry_delay: Duration,
}

impl Default for MqttBridgeSettings {
	fn default() -> Self {
		Self {
			event_loop_capacity: 10,
			connection_timeout: Duration::from_secs(5),
			max_event_loop_errors: 5,
			retry_delay: Duration::from_secs(1),
		}
	}
}

/// On-the-wire form of a message published through the bridge.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct WireEnvelope {
	/// Correlation id, if assigned
	pub correlation_id: Option<String>,
	/// Priority header
	pub priority: u8,
	/// Time-to-live in milliseconds, zero for unbounded
	pub time_to_live_millis: u64,
	/// Persistence mode requested by the producer
	pub delivery_mode: DeliveryMode,
	/// Message body
	pub body: MessageBody,
}

impl WireEnvelope {
	/// Captures the headers and body of `message`.
	pub fn from_message(message: &OutgoingMessage) -> Self {
		Self {
			correlation_id: message.correlation_id().map(str::to_string),
			priority: message.priority(),
			time_to_live_millis: u64::try_from(message.time_to_live().as_millis())
				.unwrap_or(u64::MAX),
			delivery_mode: message.delivery_mode(),
			body: message.body().clone(),
		}
	}

	/// Serializes the envelope.
	pub fn encode(&self) -> BrokerResult<Vec<u8>> {
		bincode::encode_to_vec(self, bincode::config::standard())
			.map_err(|e| BrokerError::Encode(e.to_string()))
	}

	/// Deserializes an envelope received from the broker.
	pub fn decode(bytes: &[u8]) -> BrokerResult<Self> {
		bincode::decode_from_slice(bytes, bincode::config::standard())
			.map(|(envelope, _)| envelope)
			.map_err(|e| BrokerError::Encode(e.to_string()))
	}
}

/// QoS used for a delivery mode.
pub fn qos_for(mode: DeliveryMode) -> QoS {
	match mode {
		| DeliveryMode::Persistent => QoS::AtLeastOnce,
		| DeliveryMode::NonPersistent => QoS::AtMostOnce,
	}
}

/// Checks that `topic` can be published to.
pub fn validate_topic(topic: &str) -> BrokerResult<()> {
	if topic.is_empty() || topic.len() > MAX_TOPIC_LEN {
		return Err(BrokerError::InvalidDestination {
			name: topic.to_string(),
			reason: "Topic is empty or too long".to_string(),
		});
	}
	if topic.chars().any(|c| matches!(c, '\0' | '#' | '+')) {
		return Err(BrokerError::InvalidDestination {
			name: topic.to_string(),
			reason: "Topic contains illegal characters ('#', '+', or null byte)"
				.to_string(),
		});
	}
	Ok(())
}

/// Opens MQTT connections from a set of client options.
#[derive(Debug, Clone)]
pub struct MqttConnectionFactory {
	options: MqttOptions,
	settings: MqttBridgeSettings,
}

impl MqttConnectionFactory {
	/// Factory for the given client options.
	pub fn new(options: MqttOptions) -> Self {
		Self {
			options,
			settings: MqttBridgeSettings::default(),
		}
	}

	/// Parses an MQTT URL such as `mqtt://host:1883?client_id=router`.
	///
	/// Supports: tcp://, mqtt://, ssl://, mqtts://, ws://, wss://
	pub fn from_url(url: &str) -> BrokerResult<Self> {
		MqttOptions::parse_url(url)
			.map(Self::new)
			.map_err(|e| BrokerError::MqttConnection(format!("invalid url '{url}': {e}")))
	}

	/// Overrides the bridge settings.
	pub fn with_settings(mut self, settings: MqttBridgeSettings) -> Self {
		self.settings = settings;
		self
	}
}

/// Maps a refused ConnAck to a broker error.
fn refused(code: ConnectReturnCode, principal: &str) -> BrokerError {
	match code {
		| ConnectReturnCode::BadUserNamePassword
		| ConnectReturnCode::NotAuthorized => BrokerError::Authentication {
			principal: principal.to_string(),
		},
		| other => BrokerError::MqttConnection(format!(
			"broker refused the connection: {other:?}"
		)),
	}
}

/// Polls until the broker answers the Connect packet.
async fn await_conn_ack(
	event_loop: &mut EventLoop,
	principal: &str,
) -> BrokerResult<()> {
	loop {
		let event = event_loop
			.poll()
			.await
			.map_err(|e| BrokerError::MqttConnection(e.to_string()))?;
		if let Incoming(Packet::ConnAck(ack)) = event {
			return match ack.code {
				| ConnectReturnCode::Success => Ok(()),
				| code => Err(refused(code, principal)),
			};
		}
	}
}

/// Flushes outgoing publishes until the client disconnects or the event loop
/// fails `max_event_loop_errors` times in a row.
async fn drive(mut event_loop: EventLoop, settings: MqttBridgeSettings) {
	let mut failures: u32 = 0;
	loop {
		match event_loop.poll().await {
			| Ok(Outgoing(rumqttc::Outgoing::Disconnect))
			| Ok(Incoming(Packet::Disconnect)) => break,
			| Ok(Incoming(Packet::PubAck(ack))) => {
				failures = 0;
				debug!(pkid = ack.pkid, "Publish acknowledged");
			}
			| Ok(_) => failures = 0,
			| Err(e) if failures + 1 >= settings.max_event_loop_errors => {
				error!(error = %e, failures = failures + 1, "Abandoning MQTT bridge connection");
				break;
			}
			| Err(e) => {
				failures += 1;
				warn!(error = %e, failures, retry_in = ?settings.retry_delay, "MQTT bridge connection interrupted");
				time::sleep(settings.retry_delay).await;
			}
		}
	}
	debug!("MQTT bridge event loop stopped");
}

#[async_trait]
impl ConnectionFactory for MqttConnectionFactory {
	async fn create_connection(
		&self,
		credentials: Option<&Credentials>,
	) -> BrokerResult<Box<dyn Connection>> {
		let mut options = self.options.clone();
		if let Some(credentials) = credentials {
			options.set_credentials(credentials.principal(), credentials.credential());
		}
		let (client, mut event_loop) =
			AsyncClient::new(options, self.settings.event_loop_capacity);

		let principal = credentials.map(Credentials::principal).unwrap_or_default();
		let timeout = self.settings.connection_timeout;
		time::timeout(timeout, await_conn_ack(&mut event_loop, principal))
			.await
			.map_err(|_| {
				BrokerError::MqttConnection(format!(
					"no ConnAck within {}ms",
					timeout.as_millis()
				))
			})??;
		debug!(principal, "MQTT bridge connected");

		let handle = tokio::spawn(drive(event_loop, self.settings.clone()));
		Ok(Box::new(MqttConnection {
			client,
			event_loop: Mutex::new(Some(handle)),
			closed: AtomicBool::new(false),
		}))
	}
}

/// Connection to an MQTT broker with its event loop task.
pub struct MqttConnection {
	client: AsyncClient,
	event_loop: Mutex<Option<JoinHandle<()>>>,
	closed: AtomicBool,
}

impl MqttConnection {
	fn ensure_open(&self) -> BrokerResult<()> {
		if self.closed.load(Ordering::SeqCst) {
			Err(BrokerError::Closed("connection"))
		} else {
			Ok(())
		}
	}
}

#[async_trait]
impl Connection for MqttConnection {
	async fn create_session(
		&self,
		transacted: bool,
		acknowledge_mode: AcknowledgeMode,
	) -> BrokerResult<Box<dyn Session>> {
		self.ensure_open()?;
		if transacted {
			return Err(BrokerError::Unsupported(
				"transacted sessions are not available over MQTT".to_string(),
			));
		}
		debug!(%acknowledge_mode, "Opening MQTT session");
		Ok(Box::new(MqttSession {
			client: self.client.clone(),
		}))
	}

	async fn start(&self) -> BrokerResult<()> {
		self.ensure_open()
	}

	async fn stop(&self) -> BrokerResult<()> {
		self.ensure_open()
	}

	/// Sends Disconnect, then waits for the event loop to finish.
	async fn close(&self) -> BrokerResult<()> {
		if self.closed.swap(true, Ordering::SeqCst) {
			return Ok(());
		}
		let disconnected = self.client.disconnect().await;
		if let Err(e) = &disconnected {
			warn!(error = %e, "Failed to disconnect MQTT client");
		}

		let handle = self.event_loop.lock().take();
		if let Some(handle) = handle {
			if disconnected.is_err() {
				handle.abort();
			}
			if let Err(e) = handle.await {
				if !e.is_cancelled() {
					warn!(error = %e, "Event loop task failed");
				}
			}
		}
		disconnected.map_err(BrokerError::from)
	}
}

impl Drop for MqttConnection {
	fn drop(&mut self) {
		if self.event_loop.get_mut().is_some() {
			error!("MQTT bridge connection dropped while open, its event loop keeps running until the broker drops it");
		}
	}
}

struct MqttSession {
	client: AsyncClient,
}

#[async_trait]
impl Session for MqttSession {
	async fn create_producer(
		&self,
		destination: &Destination,
	) -> BrokerResult<Box<dyn MessageProducer>> {
		validate_topic(destination.name())?;
		let settings = DeliverySettings::default();
		Ok(Box::new(MqttProducer {
			client: self.client.clone(),
			topic: destination.name().clone(),
			qos: qos_for(settings.delivery_mode),
			settings,
		}))
	}

	async fn create_browser(
		&self,
		_destination: &Destination,
	) -> BrokerResult<Option<Box<dyn QueueBrowser>>> {
		Ok(None)
	}

	fn is_transacted(&self) -> bool {
		false
	}

	async fn commit(&self) -> BrokerResult<()> {
		Err(BrokerError::Unsupported("commit over MQTT".to_string()))
	}

	async fn rollback(&self) -> BrokerResult<()> {
		Err(BrokerError::Unsupported("rollback over MQTT".to_string()))
	}

	async fn close(&self) -> BrokerResult<()> {
		Ok(())
	}
}

/// Publishes envelopes to one topic.
struct MqttProducer {
	client: AsyncClient,
	topic: ArcStr,
	qos: QoS,
	settings: DeliverySettings,
}

#[async_trait]
impl MessageProducer for MqttProducer {
	fn apply_settings(&mut self, settings: DeliverySettings) -> BrokerResult<()> {
		self.qos = qos_for(settings.delivery_mode);
		self.settings = settings;
		Ok(())
	}

	async fn send(&self, mut message: OutgoingMessage) -> BrokerResult<()> {
		message.stamp(&self.settings);
		let payload = WireEnvelope::from_message(&message).encode()?;
		self.client
			.publish(self.topic.as_str(), self.qos, false, payload)
			.await
			.map_err(BrokerError::from)
	}

	async fn close(&self) -> BrokerResult<()> {
		Ok(())
	}
}

/// Directory resolving names against an MQTT broker.
///
/// The connection-factory name resolves to an [`MqttConnectionFactory`] for
/// the [`PROVIDER_URL`] property; any other name resolves to the topic of the
/// same name.
#[derive(Debug, Clone)]
pub struct MqttDirectory {
	factory_name: ArcStr,
	default_url: Option<String>,
	settings: MqttBridgeSettings,
}

impl MqttDirectory {
	/// Directory binding the factory under `factory_name`.
	pub fn new(factory_name: impl Into<ArcStr>) -> Self {
		Self {
			factory_name: factory_name.into(),
			default_url: None,
			settings: MqttBridgeSettings::default(),
		}
	}

	/// Broker URL used when no properties are configured.
	pub fn with_default_url(mut self, url: impl Into<String>) -> Self {
		self.default_url = Some(url.into());
		self
	}

	/// Settings for the factories this directory creates.
	pub fn with_settings(mut self, settings: MqttBridgeSettings) -> Self {
		self.settings = settings;
		self
	}
}

#[async_trait]
impl Directory for MqttDirectory {
	async fn lookup(
		&self,
		name: &str,
		properties: &BTreeMap<String, String>,
	) -> Result<DirectoryEntry, NamingError> {
		if name != self.factory_name.as_str() {
			return Ok(DirectoryEntry::Destination(Destination::topic(name)));
		}
		let url = properties
			.get(PROVIDER_URL)
			.ok_or_else(|| NamingError::MissingProperty {
				name: PROVIDER_URL.to_string(),
			})?;
		let factory = MqttConnectionFactory::from_url(url)
			.map_err(|e| NamingError::InvalidProperty {
				name: PROVIDER_URL.to_string(),
				reason: e.to_string(),
			})?
			.with_settings(self.settings.clone());
		Ok(DirectoryEntry::ConnectionFactory(std::sync::Arc::new(factory)))
	}

	fn default_properties(&self) -> BTreeMap<String, String> {
		self.default_url
			.iter()
			.map(|url| (PROVIDER_URL.to_string(), url.clone()))
			.collect()
	}
}

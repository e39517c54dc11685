//! Router configuration
//!
//! [`RouterConfig`] can be built three ways: with the builder setters, from
//! JSON through serde, or from the flat parameter names used by pipeline
//! configuration files ([`RouterConfig::from_params`]). Durations are
//! expressed in milliseconds everywhere outside of Rust code.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::broker::{AcknowledgeMode, Credentials};
use crate::directory::DirectoryProperties;
use crate::encoder::MessageType;
use crate::error::ConfigurationError;
use crate::message::{DeliveryMode, DeliverySettings, MAX_PRIORITY};

/// Directory name of the connection factory when none is configured.
pub const DEFAULT_CONNECTION_FACTORY: &str = "ConnectionFactory";
/// Default high-water mark.
pub const DEFAULT_HIGH_WATER_MARK: i32 = 200;
/// Default time to wait for a destination to drain.
pub const DEFAULT_ADMISSION_TIMEOUT: Duration = Duration::from_millis(60_000);
/// Default interval between depth checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1_000);
/// High-water mark value that turns admission control off.
pub const ADMISSION_DISABLED: i32 = -1;

/// Serde helper storing a [`Duration`] as whole milliseconds.
pub mod millis {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	/// Serializes `duration` as milliseconds.
	pub fn serialize<S: Serializer>(
		duration: &Duration,
		serializer: S,
	) -> Result<S::Ok, S::Error> {
		serializer
			.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
	}

	/// Deserializes milliseconds into a [`Duration`].
	pub fn deserialize<'de, D: Deserializer<'de>>(
		deserializer: D,
	) -> Result<Duration, D::Error> {
		u64::deserialize(deserializer).map(Duration::from_millis)
	}
}

/// When the host pipeline should publish relative to its traversal.
#[derive(
	Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionPhase {
	/// On entering the element
	Before,
	/// On leaving the element
	#[default]
	After,
}

/// Backpressure settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
	/// Depth at which publishes wait; [`ADMISSION_DISABLED`] turns the check off
	pub high_water_mark: i32,
	/// How long a publish waits for the destination to drain
	#[serde(with = "millis")]
	pub timeout: Duration,
	/// Pause between depth checks
	#[serde(with = "millis")]
	pub poll_interval: Duration,
}

impl AdmissionConfig {
	/// Configuration with admission control turned off.
	pub fn disabled() -> Self {
		Self {
			high_water_mark: ADMISSION_DISABLED,
			..Self::default()
		}
	}

	/// Whether depth checks are performed.
	pub fn is_enabled(&self) -> bool {
		self.high_water_mark != ADMISSION_DISABLED
	}
}

impl Default for AdmissionConfig {
	fn default() -> Self {
		Self {
			high_water_mark: DEFAULT_HIGH_WATER_MARK,
			timeout: DEFAULT_ADMISSION_TIMEOUT,
			poll_interval: DEFAULT_POLL_INTERVAL,
		}
	}
}

/// How the broker connection, session and producer are opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
	/// Directory name of the connection factory
	pub factory_name: String,
	/// Principal and credential, when the broker needs authentication
	pub credentials: Option<Credentials>,
	/// Whether the session is transacted
	pub transacted: bool,
	/// Session acknowledge mode
	pub acknowledge_mode: AcknowledgeMode,
	/// Producer delivery settings
	pub delivery: DeliverySettings,
}

impl Default for ConnectionSettings {
	fn default() -> Self {
		Self {
			factory_name: DEFAULT_CONNECTION_FACTORY.to_string(),
			credentials: None,
			transacted: false,
			acknowledge_mode: AcknowledgeMode::AutoAcknowledge,
			delivery: DeliverySettings::default(),
		}
	}
}

/// Complete configuration of a router.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
	/// Key of the value to publish (mandatory)
	pub value_key: Option<String>,
	/// Directory name of the destination (mandatory)
	pub destination_name: Option<String>,
	/// Broker connection settings
	pub connection: ConnectionSettings,
	/// Directory settings
	pub directory: DirectoryProperties,
	/// Message body type
	pub message_type: MessageType,
	/// Correlation id template
	pub correlation_pattern: Option<String>,
	/// Backpressure settings
	pub admission: AdmissionConfig,
	/// Pipeline phase in which the router publishes
	pub execution_phase: ExecutionPhase,
}

impl RouterConfig {
	/// Configuration publishing `value_key` to `destination_name` with
	/// defaults for everything else.
	pub fn new(
		value_key: impl Into<String>,
		destination_name: impl Into<String>,
	) -> Self {
		Self {
			value_key: Some(value_key.into()),
			destination_name: Some(destination_name.into()),
			..Self::default()
		}
	}

	/// Parses a JSON document.
	pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
		Ok(serde_json::from_str(json)?)
	}

	/// Builds a configuration from flat parameters such as `beanId`,
	/// `destinationName` or `highWaterMark`.
	///
	/// Unknown parameters are ignored with a warning. An unknown acknowledge
	/// mode falls back to `AUTO_ACKNOWLEDGE`.
	pub fn from_params<I, K, V>(params: I) -> Result<Self, ConfigurationError>
	where
		I: IntoIterator<Item = (K, V)>,
		K: AsRef<str>,
		V: AsRef<str>,
	{
		let mut config = Self::default();
		let mut principal = None;
		let mut credential = None;

		for (name, value) in params {
			let (name, value) = (name.as_ref(), value.as_ref().trim());
			match name {
				| "beanId" => config.value_key = Some(value.to_string()),
				| "destinationName" => {
					config.destination_name = Some(value.to_string())
				}
				| "connectionFactory" => {
					config.connection.factory_name = value.to_string()
				}
				| "deliveryMode" => {
					config.connection.delivery.delivery_mode = parse(name, value)?
				}
				| "priority" => {
					config.connection.delivery.priority = parse(name, value)?
				}
				| "timeToLive" => {
					config.connection.delivery.time_to_live =
						Duration::from_millis(parse(name, value)?)
				}
				| "securityPrincipal" => principal = Some(value.to_string()),
				| "securityCredential" => credential = Some(value.to_string()),
				| "acknowledgeMode" => {
					config.connection.acknowledge_mode =
						AcknowledgeMode::parse_lenient(value)
				}
				| "transacted" => config.connection.transacted = parse(name, value)?,
				| "correlationIdPattern" => {
					config.correlation_pattern = Some(value.to_string())
				}
				| "messageType" => config.message_type = parse(name, value)?,
				| "highWaterMark" => {
					config.admission.high_water_mark = parse(name, value)?
				}
				| "highWaterMarkTimeout" => {
					config.admission.timeout =
						Duration::from_millis(parse(name, value)?)
				}
				| "highWaterMarkPollFrequency" => {
					config.admission.poll_interval =
						Duration::from_millis(parse(name, value)?)
				}
				| "executeBefore" => {
					config.execution_phase = if parse(name, value)? {
						ExecutionPhase::Before
					} else {
						ExecutionPhase::After
					}
				}
				| "jndiContextFactory" => {
					config.directory.context_factory = Some(value.to_string())
				}
				| "jndiProviderUrl" => {
					config.directory.provider_url = Some(value.to_string())
				}
				| "jndiNamingFactoryUrl" => {
					config.directory.url_package_prefixes = Some(value.to_string())
				}
				| "jndiPropertiesFile" => {
					config.directory.properties_file = Some(PathBuf::from(value))
				}
				| other => warn!(param = other, "Ignoring unknown router parameter"),
			}
		}

		if principal.is_some() || credential.is_some() {
			config.connection.credentials = Some(Credentials::new(
				principal.unwrap_or_default(),
				credential.unwrap_or_default(),
			));
		}
		Ok(config)
	}

	/// Checks mandatory settings and value ranges.
	pub fn validate(&self) -> Result<(), ConfigurationError> {
		if self.value_key.as_deref().map_or(true, str::is_empty) {
			return Err(ConfigurationError::MissingSetting { name: "value_key" });
		}
		if self.destination_name.as_deref().map_or(true, str::is_empty) {
			return Err(ConfigurationError::MissingSetting {
				name: "destination_name",
			});
		}
		if self.connection.factory_name.is_empty() {
			return Err(ConfigurationError::MissingSetting {
				name: "connection.factory_name",
			});
		}
		let priority = self.connection.delivery.priority;
		if priority > MAX_PRIORITY {
			return Err(ConfigurationError::invalid_value(
				"priority",
				priority,
				format!("must be between 0 and {MAX_PRIORITY}"),
			));
		}
		let mark = self.admission.high_water_mark;
		if mark < ADMISSION_DISABLED {
			return Err(ConfigurationError::invalid_value(
				"high_water_mark",
				mark,
				"must be -1 (disabled) or a depth of 0 or more",
			));
		}
		if self.admission.is_enabled() && self.admission.poll_interval.is_zero() {
			return Err(ConfigurationError::invalid_value(
				"poll_interval",
				"0ms",
				"must be greater than zero while admission control is enabled",
			));
		}
		Ok(())
	}

	/// Key of the value to publish.
	pub fn value_key(&self) -> Option<&str> {
		self.value_key.as_deref()
	}

	/// Directory name of the destination.
	pub fn destination_name(&self) -> Option<&str> {
		self.destination_name.as_deref()
	}

	/// Sets the key of the value to publish.
	pub fn with_value_key(mut self, key: impl Into<String>) -> Self {
		self.value_key = Some(key.into());
		self
	}

	/// Sets the destination name.
	pub fn with_destination(mut self, name: impl Into<String>) -> Self {
		self.destination_name = Some(name.into());
		self
	}

	/// Sets the directory name of the connection factory.
	pub fn with_connection_factory(mut self, name: impl Into<String>) -> Self {
		self.connection.factory_name = name.into();
		self
	}

	/// Authenticates connections with `credentials`.
	pub fn with_credentials(mut self, credentials: Credentials) -> Self {
		self.connection.credentials = Some(credentials);
		self
	}

	/// Opens a transacted session.
	pub fn with_transacted(mut self, transacted: bool) -> Self {
		self.connection.transacted = transacted;
		self
	}

	/// Sets the session acknowledge mode.
	pub fn with_acknowledge_mode(mut self, mode: AcknowledgeMode) -> Self {
		self.connection.acknowledge_mode = mode;
		self
	}

	/// Sets the persistence mode.
	pub fn with_delivery_mode(mut self, mode: DeliveryMode) -> Self {
		self.connection.delivery.delivery_mode = mode;
		self
	}

	/// Sets the message priority.
	pub fn with_priority(mut self, priority: u8) -> Self {
		self.connection.delivery.priority = priority;
		self
	}

	/// Sets the message time-to-live; zero never expires.
	pub fn with_time_to_live(mut self, ttl: Duration) -> Self {
		self.connection.delivery.time_to_live = ttl;
		self
	}

	/// Sets the directory settings.
	pub fn with_directory(mut self, directory: DirectoryProperties) -> Self {
		self.directory = directory;
		self
	}

	/// Sets the message body type.
	pub fn with_message_type(mut self, message_type: MessageType) -> Self {
		self.message_type = message_type;
		self
	}

	/// Sets the correlation id template.
	pub fn with_correlation_pattern(mut self, pattern: impl Into<String>) -> Self {
		self.correlation_pattern = Some(pattern.into());
		self
	}

	/// Sets the backpressure settings.
	pub fn with_admission(mut self, admission: AdmissionConfig) -> Self {
		self.admission = admission;
		self
	}

	/// Sets the high-water mark.
	pub fn with_high_water_mark(mut self, mark: i32) -> Self {
		self.admission.high_water_mark = mark;
		self
	}

	/// Sets how long a publish waits for capacity.
	pub fn with_admission_timeout(mut self, timeout: Duration) -> Self {
		self.admission.timeout = timeout;
		self
	}

	/// Sets the pause between depth checks.
	pub fn with_poll_interval(mut self, interval: Duration) -> Self {
		self.admission.poll_interval = interval;
		self
	}

	/// Sets the pipeline phase in which the router publishes.
	pub fn with_execution_phase(mut self, phase: ExecutionPhase) -> Self {
		self.execution_phase = phase;
		self
	}
}

fn parse<T>(name: &str, value: &str) -> Result<T, ConfigurationError>
where
	T: FromStr,
	T::Err: ToString,
{
	value
		.parse()
		.map_err(|e: T::Err| ConfigurationError::invalid_value(name, value, e.to_string()))
}

use thiserror::Error;

/// Errors raised by broker clients.
#[derive(Debug, Error)]
pub enum BrokerError {
	/// Operation on a handle that was already closed
	#[error("{0} is closed")]
	Closed(&'static str),

	/// Credentials were missing or rejected
	#[error("Authentication failed for principal '{principal}'")]
	Authentication {
		/// Principal that was rejected, empty when none was given
		principal: String,
	},

	/// The broker does not support the requested feature
	#[error("Unsupported operation: {0}")]
	Unsupported(String),

	/// Destination name is not valid for this broker
	#[error("Invalid destination '{name}': {reason}")]
	InvalidDestination {
		/// Destination name
		name: String,
		/// Why it was rejected
		reason: String,
	},

	/// Generic transport failure
	#[error("Transport failure: {0}")]
	Transport(String),

	/// Message could not be converted to the broker's wire format
	#[error("Failed to encode message for the wire: {0}")]
	Encode(String),

	/// Client operation failed in rumqttc
	#[error("MQTT client operation failed: {0}")]
	Mqtt(#[from] rumqttc::ClientError),

	/// The MQTT broker never accepted the connection
	#[error("MQTT connection failed: {0}")]
	MqttConnection(String),
}

/// Result type of broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

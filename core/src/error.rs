//! Error types of the router
//!
//! Leaf errors live next to the code that raises them ([`EncodingError`],
//! [`CorrelationAssignmentError`], [`NamingError`], [`BrokerError`]); this
//! module aggregates them into [`ConfigurationError`] for setup failures and
//! [`RouterError`] for everything a caller of the router can see.

use std::time::Duration;

use thiserror::Error;

use crate::broker::BrokerError;
use crate::connection::LifecycleState;
use crate::correlation::{CorrelationAssignmentError, TemplateError};
use crate::directory::NamingError;
use crate::encoder::EncodingError;

/// Setup failures. Raised by configuration parsing and `initialize`.
#[derive(Debug, Error)]
pub enum ConfigurationError {
	/// A mandatory setting has no value
	#[error("Mandatory setting '{name}' is not configured")]
	MissingSetting {
		/// Setting name
		name: &'static str,
	},

	/// A setting has a value that cannot be used
	#[error("Invalid value '{value}' for setting '{name}': {reason}")]
	InvalidValue {
		/// Setting name
		name: String,
		/// Offending value
		value: String,
		/// Why it was rejected
		reason: String,
	},

	/// Directory properties could not be assembled
	#[error("Failed to build directory properties: {0}")]
	Directory(#[from] NamingError),

	/// A name could not be resolved
	#[error("Lookup of '{name}' failed: {source}")]
	Naming {
		/// Name that was looked up
		name: String,
		/// Underlying failure
		#[source]
		source: NamingError,
	},

	/// A name resolved to the wrong kind of object
	#[error("'{name}' is bound to a {found}, expected a {expected}")]
	WrongEntryKind {
		/// Name that was looked up
		name: String,
		/// Kind the router needed
		expected: &'static str,
		/// Kind that was bound
		found: &'static str,
	},

	/// Acquiring a broker resource failed
	#[error("Failed to {step} for destination '{destination}': {source}")]
	Resource {
		/// Acquisition step that failed
		step: &'static str,
		/// Destination being set up
		destination: String,
		/// Underlying failure
		#[source]
		source: BrokerError,
	},

	/// The correlation pattern is malformed
	#[error("Invalid correlation id pattern: {0}")]
	Template(#[from] TemplateError),

	/// JSON configuration could not be parsed
	#[error("Failed to parse configuration: {0}")]
	Json(#[from] serde_json::Error),

	/// Operation not allowed in the current lifecycle state
	#[error("Cannot {operation} while {state}")]
	Lifecycle {
		/// Attempted operation
		operation: &'static str,
		/// Current state
		state: LifecycleState,
	},
}

impl ConfigurationError {
	/// Shorthand for [`ConfigurationError::InvalidValue`].
	pub fn invalid_value(
		name: impl Into<String>,
		value: impl ToString,
		reason: impl Into<String>,
	) -> Self {
		ConfigurationError::InvalidValue {
			name: name.into(),
			value: value.to_string(),
			reason: reason.into(),
		}
	}

	/// Shorthand for [`ConfigurationError::Resource`].
	pub fn resource(
		step: &'static str,
		destination: impl Into<String>,
		source: BrokerError,
	) -> Self {
		ConfigurationError::Resource {
			step,
			destination: destination.into(),
			source,
		}
	}
}

/// Every error a router operation can return.
#[derive(Debug, Error)]
pub enum RouterError {
	/// Configuration or initialization failure
	#[error(transparent)]
	Configuration(#[from] ConfigurationError),

	/// The value could not be turned into a message body
	#[error(transparent)]
	Encoding(#[from] EncodingError),

	/// The correlation id could not be computed or applied
	#[error(transparent)]
	Correlation(#[from] CorrelationAssignmentError),

	/// The destination stayed at or above its high-water mark
	#[error(
		"Failed to route message to '{destination}'. Timed out ({timeout:?}) \
		 waiting for queue length to drop below High Water Mark \
		 ({high_water_mark}), last depth {depth}. Consider increasing the \
		 High Water Mark timeout or the High Water Mark"
	)]
	BackpressureTimeout {
		/// Destination name
		destination: String,
		/// Configured high-water mark
		high_water_mark: i32,
		/// Configured wait limit
		timeout: Duration,
		/// Depth observed at the last check
		depth: usize,
	},

	/// Inspecting the destination depth failed
	#[error("Failed to inspect depth of '{destination}': {source}")]
	AdmissionCheck {
		/// Destination name
		destination: String,
		/// Underlying failure
		#[source]
		source: BrokerError,
	},

	/// The broker rejected or failed the send
	#[error("Failed to send message to '{destination}': {source}")]
	Publish {
		/// Destination name
		destination: String,
		/// Underlying failure
		#[source]
		source: BrokerError,
	},

	/// Publish attempted before `initialize` or after `close`
	#[error("Router is not ready to publish (state: {state})")]
	NotReady {
		/// Current state
		state: LifecycleState,
	},
}

impl RouterError {
	/// Whether the publish failed because the destination stayed full.
	pub fn is_backpressure(&self) -> bool {
		matches!(self, RouterError::BackpressureTimeout { .. })
	}

	/// Whether the failure came from the broker transport.
	pub fn is_transport(&self) -> bool {
		matches!(
			self,
			RouterError::Publish { .. } | RouterError::AdmissionCheck { .. }
		)
	}
}

/// Result type of router operations.
pub type RouterResult<T> = Result<T, RouterError>;

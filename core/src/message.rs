//! Outgoing message model handed to broker producers.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum accepted length of a correlation id, in bytes.
pub const MAX_CORRELATION_ID_LEN: usize = 4096;

/// Default message priority.
pub const DEFAULT_PRIORITY: u8 = 4;

/// Highest message priority.
pub const MAX_PRIORITY: u8 = 9;

/// Whether the broker should persist a message before acknowledging it.
#[derive(
	Debug,
	Clone,
	Copy,
	Default,
	PartialEq,
	Eq,
	Hash,
	Serialize,
	Deserialize,
	Encode,
	Decode,
)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryMode {
	/// Survives broker restarts
	#[default]
	Persistent,
	/// May be lost on broker failure
	NonPersistent,
}

impl FromStr for DeliveryMode {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			| "persistent" => Ok(DeliveryMode::Persistent),
			| "non-persistent" | "non_persistent" => {
				Ok(DeliveryMode::NonPersistent)
			}
			| other => Err(format!(
				"unknown delivery mode '{other}', expected 'persistent' or \
				 'non-persistent'"
			)),
		}
	}
}

impl fmt::Display for DeliveryMode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			| DeliveryMode::Persistent => f.write_str("persistent"),
			| DeliveryMode::NonPersistent => f.write_str("non-persistent"),
		}
	}
}

/// Producer-level delivery settings stamped on every message it sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliverySettings {
	/// Priority, 0 (lowest) to 9 (highest)
	pub priority: u8,
	/// Time-to-live; zero means the message never expires
	#[serde(with = "crate::config::millis")]
	pub time_to_live: Duration,
	/// Persistence mode
	pub delivery_mode: DeliveryMode,
}

impl Default for DeliverySettings {
	fn default() -> Self {
		Self {
			priority: DEFAULT_PRIORITY,
			time_to_live: Duration::ZERO,
			delivery_mode: DeliveryMode::Persistent,
		}
	}
}

/// A single typed entry of a structured-map message.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum MapField {
	/// UTF-8 string
	String(String),
	/// 32-bit integer
	Int(i32),
	/// 64-bit integer
	Long(i64),
	/// 64-bit float
	Double(f64),
	/// 32-bit float
	Float(f32),
	/// Boolean flag
	Boolean(bool),
	/// 16-bit integer
	Short(i16),
	/// 8-bit integer
	Byte(i8),
	/// Single character
	Char(char),
	/// Byte sequence
	Bytes(Vec<u8>),
}

/// Body of a structured-map message with typed accessors.
///
/// Numeric getters widen the same way a map message does: an `int` getter
/// also reads `short` and `byte` entries, a `double` getter reads `float`.
#[derive(Debug, Clone, Default, PartialEq, Encode, Decode)]
pub struct MapBody {
	fields: BTreeMap<String, MapField>,
}

impl MapBody {
	/// Creates an empty map body.
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets `key` to `field`, replacing any previous entry.
	pub fn set(&mut self, key: impl Into<String>, field: MapField) {
		self.fields.insert(key.into(), field);
	}

	/// Raw entry for `key`.
	pub fn field(&self, key: &str) -> Option<&MapField> {
		self.fields.get(key)
	}

	/// Number of entries.
	pub fn len(&self) -> usize {
		self.fields.len()
	}

	/// Whether the map has no entries.
	pub fn is_empty(&self) -> bool {
		self.fields.is_empty()
	}

	/// Iterates over the entries in key order.
	pub fn iter(&self) -> impl Iterator<Item = (&str, &MapField)> {
		self.fields.iter().map(|(k, v)| (k.as_str(), v))
	}

	/// Reads an entry as a string; every type except bytes converts.
	pub fn get_string(&self, key: &str) -> Option<String> {
		Some(match self.fields.get(key)? {
			| MapField::String(v) => v.clone(),
			| MapField::Int(v) => v.to_string(),
			| MapField::Long(v) => v.to_string(),
			| MapField::Double(v) => v.to_string(),
			| MapField::Float(v) => v.to_string(),
			| MapField::Boolean(v) => v.to_string(),
			| MapField::Short(v) => v.to_string(),
			| MapField::Byte(v) => v.to_string(),
			| MapField::Char(v) => v.to_string(),
			| MapField::Bytes(_) => return None,
		})
	}

	/// Reads an `int`, widening `short` and `byte`.
	pub fn get_int(&self, key: &str) -> Option<i32> {
		match self.fields.get(key)? {
			| MapField::Int(v) => Some(*v),
			| MapField::Short(v) => Some(i32::from(*v)),
			| MapField::Byte(v) => Some(i32::from(*v)),
			| _ => None,
		}
	}

	/// Reads a `long`, widening every narrower integer.
	pub fn get_long(&self, key: &str) -> Option<i64> {
		match self.fields.get(key)? {
			| MapField::Long(v) => Some(*v),
			| MapField::Int(v) => Some(i64::from(*v)),
			| MapField::Short(v) => Some(i64::from(*v)),
			| MapField::Byte(v) => Some(i64::from(*v)),
			| _ => None,
		}
	}

	/// Reads a `double`, widening `float`.
	pub fn get_double(&self, key: &str) -> Option<f64> {
		match self.fields.get(key)? {
			| MapField::Double(v) => Some(*v),
			| MapField::Float(v) => Some(f64::from(*v)),
			| _ => None,
		}
	}

	/// Reads a `float`.
	pub fn get_float(&self, key: &str) -> Option<f32> {
		match self.fields.get(key)? {
			| MapField::Float(v) => Some(*v),
			| _ => None,
		}
	}

	/// Reads a `boolean`.
	pub fn get_boolean(&self, key: &str) -> Option<bool> {
		match self.fields.get(key)? {
			| MapField::Boolean(v) => Some(*v),
			| _ => None,
		}
	}

	/// Reads a `short`, widening `byte`.
	pub fn get_short(&self, key: &str) -> Option<i16> {
		match self.fields.get(key)? {
			| MapField::Short(v) => Some(*v),
			| MapField::Byte(v) => Some(i16::from(*v)),
			| _ => None,
		}
	}

	/// Reads a `byte`.
	pub fn get_byte(&self, key: &str) -> Option<i8> {
		match self.fields.get(key)? {
			| MapField::Byte(v) => Some(*v),
			| _ => None,
		}
	}

	/// Reads a `char`.
	pub fn get_char(&self, key: &str) -> Option<char> {
		match self.fields.get(key)? {
			| MapField::Char(v) => Some(*v),
			| _ => None,
		}
	}

	/// Reads a byte sequence.
	pub fn get_bytes(&self, key: &str) -> Option<&[u8]> {
		match self.fields.get(key)? {
			| MapField::Bytes(v) => Some(v),
			| _ => None,
		}
	}
}

/// Wire body of an outgoing message.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum MessageBody {
	/// Text body
	Text(String),
	/// Structured map body
	Map(MapBody),
	/// Opaque serialized object
	Object(Vec<u8>),
}

impl MessageBody {
	/// Text content, if this is a text body.
	pub fn as_text(&self) -> Option<&str> {
		match self {
			| MessageBody::Text(text) => Some(text),
			| _ => None,
		}
	}

	/// Map content, if this is a map body.
	pub fn as_map(&self) -> Option<&MapBody> {
		match self {
			| MessageBody::Map(map) => Some(map),
			| _ => None,
		}
	}

	/// Serialized bytes, if this is an object body.
	pub fn as_object_bytes(&self) -> Option<&[u8]> {
		match self {
			| MessageBody::Object(bytes) => Some(bytes),
			| _ => None,
		}
	}
}

/// Error applying a header to a message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageError {
	/// Correlation id exceeds [`MAX_CORRELATION_ID_LEN`]
	#[error("correlation id is {len} bytes long, limit is {max}")]
	CorrelationIdTooLong {
		/// Actual length
		len: usize,
		/// Allowed length
		max: usize,
	},
	/// Correlation id contains a NUL character
	#[error("correlation id contains a NUL character")]
	CorrelationIdNul,
}

/// A message on its way to a destination.
///
/// Created fresh for every publish; ownership moves to the producer on send.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
	body: MessageBody,
	correlation_id: Option<String>,
	priority: u8,
	time_to_live: Duration,
	delivery_mode: DeliveryMode,
}

impl OutgoingMessage {
	/// Creates a message with default headers.
	pub fn new(body: MessageBody) -> Self {
		let defaults = DeliverySettings::default();
		Self {
			body,
			correlation_id: None,
			priority: defaults.priority,
			time_to_live: defaults.time_to_live,
			delivery_mode: defaults.delivery_mode,
		}
	}

	/// Sets the correlation id.
	pub fn set_correlation_id(
		&mut self,
		id: impl Into<String>,
	) -> Result<(), MessageError> {
		let id = id.into();
		if id.len() > MAX_CORRELATION_ID_LEN {
			return Err(MessageError::CorrelationIdTooLong {
				len: id.len(),
				max: MAX_CORRELATION_ID_LEN,
			});
		}
		if id.contains('\0') {
			return Err(MessageError::CorrelationIdNul);
		}
		self.correlation_id = Some(id);
		Ok(())
	}

	/// Applies producer-level delivery settings.
	pub fn stamp(&mut self, settings: &DeliverySettings) {
		self.priority = settings.priority;
		self.time_to_live = settings.time_to_live;
		self.delivery_mode = settings.delivery_mode;
	}

	/// Message body.
	pub fn body(&self) -> &MessageBody {
		&self.body
	}

	/// Consumes the message, returning its body.
	pub fn into_body(self) -> MessageBody {
		self.body
	}

	/// Correlation id, if assigned.
	pub fn correlation_id(&self) -> Option<&str> {
		self.correlation_id.as_deref()
	}

	/// Priority header.
	pub fn priority(&self) -> u8 {
		self.priority
	}

	/// Time-to-live header; zero means unbounded.
	pub fn time_to_live(&self) -> Duration {
		self.time_to_live
	}

	/// Persistence mode.
	pub fn delivery_mode(&self) -> DeliveryMode {
		self.delivery_mode
	}

	/// Whether the message is sent persistently.
	pub fn is_persistent(&self) -> bool {
		self.delivery_mode == DeliveryMode::Persistent
	}
}

//! Message encoding strategies.
//!
//! An encoder looks up the configured value and turns it into a
//! [`MessageBody`]. Three strategies ship with the crate: text, structured
//! map and opaque object. Custom strategies implement [`MessageEncoder`].

use std::collections::BTreeMap;
use std::fmt::{self, Debug};
use std::str::FromStr;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::{MapBody, MapField, MessageBody};
use crate::value::{Value, ValueLookup};

/// Errors that make a single publish impossible to encode.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodingError {
	/// The configured key has no bound value
	#[error(
		"Value '{key}' not available in the execution context. Check the \
		 order in which the components producing it are applied"
	)]
	MissingValue {
		/// Key that was looked up
		key: String,
	},

	/// The structured-map strategy received something other than a map
	#[error(
		"Value '{key}' of type '{type_name}' cannot be sent as a map message \
		 because it is not a mapping"
	)]
	TypeMismatch {
		/// Key that was looked up
		key: String,
		/// Runtime type of the offending value
		type_name: String,
	},

	/// The opaque-object strategy received something it cannot serialize
	#[error(
		"Value '{key}' of type '{type_name}' cannot be sent as an object \
		 message because it is not serializable"
	)]
	NotSerializable {
		/// Key that was looked up
		key: String,
		/// Runtime type of the offending value
		type_name: String,
	},

	/// Serialization itself failed
	#[error("Failed to serialize value '{key}': {reason}")]
	Serialization {
		/// Key that was looked up
		key: String,
		/// Underlying failure
		reason: String,
	},
}

/// Strategy turning a named value into a message body.
pub trait MessageEncoder: Debug + Send + Sync {
	/// Message type this strategy produces.
	fn message_type(&self) -> MessageType;

	/// Encodes the value bound to `key`.
	fn encode(
		&self,
		key: &str,
		values: &dyn ValueLookup,
	) -> Result<MessageBody, EncodingError>;
}

fn lookup<'a>(
	key: &str,
	values: &'a dyn ValueLookup,
) -> Result<&'a Value, EncodingError> {
	values.get(key).ok_or_else(|| EncodingError::MissingValue {
		key: key.to_string(),
	})
}

/// Kind of message body produced for each publish.
#[derive(
	Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
	/// Display form of the value
	#[default]
	Text,
	/// Field-by-field typed map
	Map,
	/// Serialized object
	Object,
}

impl MessageType {
	/// Builds the stock encoder for this message type.
	pub fn encoder(self) -> Box<dyn MessageEncoder> {
		match self {
			| MessageType::Text => Box::new(TextEncoder),
			| MessageType::Map => Box::new(MapEncoder),
			| MessageType::Object => Box::new(ObjectEncoder),
		}
	}
}

impl FromStr for MessageType {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			| "text" | "textmessage" => Ok(MessageType::Text),
			| "map" | "mapmessage" => Ok(MessageType::Map),
			| "object" | "objectmessage" => Ok(MessageType::Object),
			| other => Err(format!(
				"unknown message type '{other}', expected 'text', 'map' or \
				 'object'"
			)),
		}
	}
}

impl fmt::Display for MessageType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			| MessageType::Text => f.write_str("text"),
			| MessageType::Map => f.write_str("map"),
			| MessageType::Object => f.write_str("object"),
		}
	}
}

/// Sends the display form of the value.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextEncoder;

impl MessageEncoder for TextEncoder {
	fn message_type(&self) -> MessageType {
		MessageType::Text
	}

	fn encode(
		&self,
		key: &str,
		values: &dyn ValueLookup,
	) -> Result<MessageBody, EncodingError> {
		Ok(MessageBody::Text(lookup(key, values)?.to_string()))
	}
}

/// Sends a mapping entry by entry with the most specific field type.
///
/// Entries that are not primitives (lists, nested maps, objects) are sent
/// as their display form, so an unexpected entry type never fails a publish.
#[derive(Debug, Clone, Copy, Default)]
pub struct MapEncoder;

impl MapEncoder {
	/// Picks the map field type for a single entry.
	pub fn field_for(value: &Value) -> MapField {
		match value {
			| Value::String(v) => MapField::String(v.clone()),
			| Value::Int(v) => MapField::Int(*v),
			| Value::Long(v) => MapField::Long(*v),
			| Value::Double(v) => MapField::Double(*v),
			| Value::Float(v) => MapField::Float(*v),
			| Value::Boolean(v) => MapField::Boolean(*v),
			| Value::Short(v) => MapField::Short(*v),
			| Value::Byte(v) => MapField::Byte(*v),
			| Value::Char(v) => MapField::Char(*v),
			| Value::Bytes(v) => MapField::Bytes(v.to_vec()),
			| other => MapField::String(other.to_string()),
		}
	}
}

impl MessageEncoder for MapEncoder {
	fn message_type(&self) -> MessageType {
		MessageType::Map
	}

	fn encode(
		&self,
		key: &str,
		values: &dyn ValueLookup,
	) -> Result<MessageBody, EncodingError> {
		let value = lookup(key, values)?;
		let entries =
			value.as_map().ok_or_else(|| EncodingError::TypeMismatch {
				key: key.to_string(),
				type_name: value.type_name().to_string(),
			})?;

		let mut body = MapBody::new();
		for (name, entry) in entries {
			body.set(name.clone(), Self::field_for(entry));
		}
		Ok(MessageBody::Map(body))
	}
}

/// Serialized form carried by object messages.
///
/// Mirrors [`Value`], with application objects replaced by their type name
/// and serialized bytes.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum ObjectPayload {
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
	/// List of payloads
	List(Vec<ObjectPayload>),
	/// Map of payloads
	Map(BTreeMap<String, ObjectPayload>),
	/// Serialized application object
	Object {
		/// Type name reported by the object
		type_name: String,
		/// Bytes produced by the object's serializer
		data: Vec<u8>,
	},
}

impl ObjectPayload {
	/// Decodes a payload from an object message body.
	pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::error::DecodeError> {
		bincode::decode_from_slice(bytes, bincode::config::standard())
			.map(|(payload, _)| payload)
	}

	/// Decodes the application object carried by an `Object` payload.
	pub fn decode_object<T: Decode<()>>(
		&self,
	) -> Option<Result<T, bincode::error::DecodeError>> {
		match self {
			| ObjectPayload::Object { data, .. } => Some(
				bincode::decode_from_slice(data, bincode::config::standard())
					.map(|(value, _)| value),
			),
			| _ => None,
		}
	}

	fn try_from_value(key: &str, value: &Value) -> Result<Self, EncodingError> {
		Ok(match value {
			| Value::String(v) => ObjectPayload::String(v.clone()),
			| Value::Int(v) => ObjectPayload::Int(*v),
			| Value::Long(v) => ObjectPayload::Long(*v),
			| Value::Double(v) => ObjectPayload::Double(*v),
			| Value::Float(v) => ObjectPayload::Float(*v),
			| Value::Boolean(v) => ObjectPayload::Boolean(*v),
			| Value::Short(v) => ObjectPayload::Short(*v),
			| Value::Byte(v) => ObjectPayload::Byte(*v),
			| Value::Char(v) => ObjectPayload::Char(*v),
			| Value::Bytes(v) => ObjectPayload::Bytes(v.to_vec()),
			| Value::List(items) => ObjectPayload::List(
				items
					.iter()
					.map(|item| Self::try_from_value(key, item))
					.collect::<Result<_, _>>()?,
			),
			| Value::Map(entries) => ObjectPayload::Map(
				entries
					.iter()
					.map(|(name, entry)| {
						Ok((name.clone(), Self::try_from_value(key, entry)?))
					})
					.collect::<Result<_, EncodingError>>()?,
			),
			| Value::Object(object) => {
				let data = object
					.to_bytes()
					.ok_or_else(|| EncodingError::NotSerializable {
						key: key.to_string(),
						type_name: object.type_name().to_string(),
					})?
					.map_err(|reason| EncodingError::Serialization {
						key: key.to_string(),
						reason,
					})?;
				ObjectPayload::Object {
					type_name: object.type_name().to_string(),
					data,
				}
			}
		})
	}
}

/// Serializes the value with the standard bincode configuration, the same
/// one [`ObjectPayload::from_bytes`] decodes with.
///
/// Values containing an object that cannot serialize itself are rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectEncoder;

impl MessageEncoder for ObjectEncoder {
	fn message_type(&self) -> MessageType {
		MessageType::Object
	}

	fn encode(
		&self,
		key: &str,
		values: &dyn ValueLookup,
	) -> Result<MessageBody, EncodingError> {
		let payload = ObjectPayload::try_from_value(key, lookup(key, values)?)?;
		bincode::encode_to_vec(&payload, bincode::config::standard())
			.map(MessageBody::Object)
			.map_err(|e| EncodingError::Serialization {
				key: key.to_string(),
				reason: e.to_string(),
			})
	}
}

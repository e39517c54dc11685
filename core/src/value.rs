//! Application values published by the router and the lookup contract the
//! host pipeline implements to hand them over.

use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Display};
use std::sync::Arc;

use arcstr::ArcStr;
use bincode::Encode;
use bytes::Bytes;

/// An application object carried inside a [`Value`].
///
/// Objects that can be turned into bytes are eligible for the opaque-object
/// encoding; all others are only usable through their display form.
pub trait BeanObject: fmt::Debug + Display + Send + Sync {
	/// Name of the concrete type, used in error messages.
	fn type_name(&self) -> &str;

	/// Serialized form of the object.
	///
	/// `None` means the object is not serializable at all.
	fn to_bytes(&self) -> Option<Result<Vec<u8>, String>> {
		None
	}
}

/// Wraps any bincode-encodable type so it can travel as an opaque object.
#[derive(Debug, Clone, PartialEq)]
pub struct SerializableBean<T> {
	inner: T,
}

impl<T> SerializableBean<T> {
	/// Wraps `inner`.
	pub fn new(inner: T) -> Self {
		Self { inner }
	}

	/// Returns the wrapped value.
	pub fn get(&self) -> &T {
		&self.inner
	}
}

impl<T: Display> Display for SerializableBean<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.inner.fmt(f)
	}
}

impl<T> BeanObject for SerializableBean<T>
where T: Encode + fmt::Debug + Display + Send + Sync
{
	fn type_name(&self) -> &str {
		std::any::type_name::<T>()
	}

	fn to_bytes(&self) -> Option<Result<Vec<u8>, String>> {
		Some(
			bincode::encode_to_vec(&self.inner, bincode::config::standard())
				.map_err(|e| e.to_string()),
		)
	}
}

/// A value bound in the execution context.
#[derive(Debug, Clone)]
pub enum Value {
	/// UTF-8 string
	String(String),
	/// 32-bit signed integer
	Int(i32),
	/// 64-bit signed integer
	Long(i64),
	/// 64-bit float
	Double(f64),
	/// 32-bit float
	Float(f32),
	/// Boolean flag
	Boolean(bool),
	/// 16-bit signed integer
	Short(i16),
	/// 8-bit signed integer
	Byte(i8),
	/// Single character
	Char(char),
	/// Raw byte sequence
	Bytes(Bytes),
	/// Ordered list of values
	List(Vec<Value>),
	/// Mapping with unique string keys
	Map(BTreeMap<String, Value>),
	/// Arbitrary application object
	Object(Arc<dyn BeanObject>),
}

impl Value {
	/// Wraps an application object.
	pub fn object(object: impl BeanObject + 'static) -> Self {
		Value::Object(Arc::new(object))
	}

	/// Wraps a bincode-encodable object so it can be sent opaquely.
	pub fn serializable<T>(object: T) -> Self
	where T: Encode + fmt::Debug + Display + Send + Sync + 'static {
		Value::Object(Arc::new(SerializableBean::new(object)))
	}

	/// Name of the runtime type of this value.
	pub fn type_name(&self) -> &str {
		match self {
			| Value::String(_) => "string",
			| Value::Int(_) => "int",
			| Value::Long(_) => "long",
			| Value::Double(_) => "double",
			| Value::Float(_) => "float",
			| Value::Boolean(_) => "boolean",
			| Value::Short(_) => "short",
			| Value::Byte(_) => "byte",
			| Value::Char(_) => "char",
			| Value::Bytes(_) => "bytes",
			| Value::List(_) => "list",
			| Value::Map(_) => "map",
			| Value::Object(object) => object.type_name(),
		}
	}

	/// Returns the entries if this value is a mapping.
	pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
		match self {
			| Value::Map(map) => Some(map),
			| _ => None,
		}
	}

	/// Flattens this value into `out` under `prefix`, descending into maps
	/// with dotted keys (`order.id`).
	pub fn flatten_into(&self, prefix: &str, out: &mut BTreeMap<String, String>) {
		out.insert(prefix.to_string(), self.to_string());
		if let Value::Map(entries) = self {
			for (key, value) in entries {
				value.flatten_into(&format!("{prefix}.{key}"), out);
			}
		}
	}
}

impl Display for Value {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			| Value::String(s) => f.write_str(s),
			| Value::Int(v) => write!(f, "{v}"),
			| Value::Long(v) => write!(f, "{v}"),
			| Value::Double(v) => write!(f, "{v}"),
			| Value::Float(v) => write!(f, "{v}"),
			| Value::Boolean(v) => write!(f, "{v}"),
			| Value::Short(v) => write!(f, "{v}"),
			| Value::Byte(v) => write!(f, "{v}"),
			| Value::Char(v) => write!(f, "{v}"),
			| Value::Bytes(bytes) => write!(f, "{:?}", bytes.as_ref()),
			| Value::List(items) => {
				f.write_str("[")?;
				for (i, item) in items.iter().enumerate() {
					if i > 0 {
						f.write_str(", ")?;
					}
					write!(f, "{item}")?;
				}
				f.write_str("]")
			}
			| Value::Map(entries) => {
				f.write_str("{")?;
				for (i, (key, value)) in entries.iter().enumerate() {
					if i > 0 {
						f.write_str(", ")?;
					}
					write!(f, "{key}: {value}")?;
				}
				f.write_str("}")
			}
			| Value::Object(object) => write!(f, "{object}"),
		}
	}
}

macro_rules! impl_from_primitive {
	($($ty:ty => $variant:ident),* $(,)?) => {
		$(
			impl From<$ty> for Value {
				fn from(value: $ty) -> Self {
					Value::$variant(value.into())
				}
			}
		)*
	};
}

impl_from_primitive! {
	String => String,
	&str => String,
	i32 => Int,
	i64 => Long,
	f64 => Double,
	f32 => Float,
	bool => Boolean,
	i16 => Short,
	i8 => Byte,
	char => Char,
	Bytes => Bytes,
	Vec<u8> => Bytes,
	Vec<Value> => List,
	BTreeMap<String, Value> => Map,
}

/// Read access to the named values of the current execution.
pub trait ValueLookup: Send + Sync {
	/// Returns the value bound to `key`, if any.
	fn get(&self, key: &str) -> Option<&Value>;

	/// Snapshot of every value currently bound.
	fn merged_view(&self) -> BTreeMap<String, Value>;
}

/// Default in-memory value repository.
#[derive(Debug, Clone, Default)]
pub struct BeanContext {
	values: HashMap<ArcStr, Value>,
}

impl BeanContext {
	/// Creates an empty context.
	pub fn new() -> Self {
		Self::default()
	}

	/// Binds `value` under `key`, returning the previous value.
	pub fn insert(
		&mut self,
		key: impl Into<ArcStr>,
		value: impl Into<Value>,
	) -> Option<Value> {
		self.values.insert(key.into(), value.into())
	}

	/// Removes the binding for `key`.
	pub fn remove(&mut self, key: &str) -> Option<Value> {
		self.values.remove(key)
	}

	/// Number of bound values.
	pub fn len(&self) -> usize {
		self.values.len()
	}

	/// Whether nothing is bound.
	pub fn is_empty(&self) -> bool {
		self.values.is_empty()
	}
}

impl ValueLookup for BeanContext {
	fn get(&self, key: &str) -> Option<&Value> {
		self.values.get(key)
	}

	fn merged_view(&self) -> BTreeMap<String, Value> {
		self.values
			.iter()
			.map(|(key, value)| (key.to_string(), value.clone()))
			.collect()
	}
}

impl<K, V> FromIterator<(K, V)> for BeanContext
where
	K: Into<ArcStr>,
	V: Into<Value>,
{
	fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
		Self {
			values: iter
				.into_iter()
				.map(|(key, value)| (key.into(), value.into()))
				.collect(),
		}
	}
}

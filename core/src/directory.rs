//! Name resolution for connection factories and destinations.
//!
//! The router never constructs broker objects itself; it asks a
//! [`Directory`] for them by name, passing the flat property map built from
//! [`DirectoryProperties`].

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arcstr::ArcStr;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::broker::{ConnectionFactory, Destination};

/// Property naming the directory implementation to use.
pub const CONTEXT_FACTORY: &str = "naming.factory.initial";
/// Property holding the directory service location.
pub const PROVIDER_URL: &str = "naming.provider.url";
/// Property listing URL context factory package prefixes.
pub const URL_PKG_PREFIXES: &str = "naming.factory.url.pkgs";

/// Errors resolving a name.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NamingError {
	/// Nothing is bound under the name
	#[error("Name '{name}' is not bound in the directory")]
	NotBound {
		/// Name that was looked up
		name: String,
	},

	/// A required directory property is absent
	#[error("Directory property '{name}' is not set")]
	MissingProperty {
		/// Property key
		name: String,
	},

	/// A directory property has an unusable value
	#[error("Directory property '{name}' is invalid: {reason}")]
	InvalidProperty {
		/// Property key
		name: String,
		/// Why it was rejected
		reason: String,
	},

	/// The properties file could not be read
	#[error("Failed to read directory properties file '{path}': {reason}")]
	PropertiesFile {
		/// File path
		path: PathBuf,
		/// Underlying failure
		reason: String,
	},
}

/// Object bound in a directory.
#[derive(Debug, Clone)]
pub enum DirectoryEntry {
	/// Factory for broker connections
	ConnectionFactory(Arc<dyn ConnectionFactory>),
	/// Queue or topic
	Destination(Destination),
}

impl DirectoryEntry {
	/// Human readable kind, used in error messages.
	pub fn kind_name(&self) -> &'static str {
		match self {
			| DirectoryEntry::ConnectionFactory(_) => "connection factory",
			| DirectoryEntry::Destination(_) => "destination",
		}
	}
}

/// Resolves names to broker objects.
#[async_trait]
pub trait Directory: Debug + Send + Sync {
	/// Looks up `name` using the given directory properties.
	async fn lookup(
		&self,
		name: &str,
		properties: &BTreeMap<String, String>,
	) -> Result<DirectoryEntry, NamingError>;

	/// Properties used when none are configured.
	fn default_properties(&self) -> BTreeMap<String, String> {
		BTreeMap::new()
	}
}

/// Directory with names bound in memory.
#[derive(Debug, Default)]
pub struct StaticDirectory {
	entries: RwLock<HashMap<ArcStr, DirectoryEntry>>,
	defaults: BTreeMap<String, String>,
}

impl StaticDirectory {
	/// Creates an empty directory.
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets the properties reported by [`Directory::default_properties`].
	pub fn with_default_properties(
		mut self,
		defaults: BTreeMap<String, String>,
	) -> Self {
		self.defaults = defaults;
		self
	}

	/// Binds a connection factory under `name`.
	pub fn bind_connection_factory(
		&self,
		name: impl Into<ArcStr>,
		factory: Arc<dyn ConnectionFactory>,
	) -> &Self {
		self.bind(name, DirectoryEntry::ConnectionFactory(factory))
	}

	/// Binds a destination under its own name.
	pub fn bind_destination(&self, destination: Destination) -> &Self {
		let name = destination.name().clone();
		self.bind(name, DirectoryEntry::Destination(destination))
	}

	/// Binds `entry` under `name`, replacing any previous binding.
	pub fn bind(&self, name: impl Into<ArcStr>, entry: DirectoryEntry) -> &Self {
		self.entries.write().insert(name.into(), entry);
		self
	}

	/// Removes the binding for `name`.
	pub fn unbind(&self, name: &str) -> Option<DirectoryEntry> {
		self.entries.write().remove(name)
	}
}

#[async_trait]
impl Directory for StaticDirectory {
	async fn lookup(
		&self,
		name: &str,
		_properties: &BTreeMap<String, String>,
	) -> Result<DirectoryEntry, NamingError> {
		self.entries
			.read()
			.get(name)
			.cloned()
			.ok_or_else(|| NamingError::NotBound {
				name: name.to_string(),
			})
	}

	fn default_properties(&self) -> BTreeMap<String, String> {
		self.defaults.clone()
	}
}

/// Directory connection settings.
///
/// Explicit `properties` are applied first, then the properties file, then
/// the named settings. When the result is empty the directory's defaults are
/// used instead; configured and default properties are never merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryProperties {
	/// Directory implementation ([`CONTEXT_FACTORY`])
	pub context_factory: Option<String>,
	/// Directory location ([`PROVIDER_URL`])
	pub provider_url: Option<String>,
	/// URL context factory packages ([`URL_PKG_PREFIXES`])
	pub url_package_prefixes: Option<String>,
	/// `key=value` file with further properties
	pub properties_file: Option<PathBuf>,
	/// Free-form properties
	pub properties: BTreeMap<String, String>,
}

impl DirectoryProperties {
	/// Whether nothing at all is configured.
	pub fn is_empty(&self) -> bool {
		self.context_factory.is_none()
			&& self.provider_url.is_none()
			&& self.url_package_prefixes.is_none()
			&& self.properties_file.is_none()
			&& self.properties.is_empty()
	}

	/// Builds the flat property map passed to [`Directory::lookup`].
	pub fn to_properties(
		&self,
		defaults: BTreeMap<String, String>,
	) -> Result<BTreeMap<String, String>, NamingError> {
		let mut properties = self.properties.clone();

		if let Some(path) = &self.properties_file {
			properties.extend(read_properties_file(path)?);
		}

		let named = [
			(CONTEXT_FACTORY, &self.context_factory),
			(PROVIDER_URL, &self.provider_url),
			(URL_PKG_PREFIXES, &self.url_package_prefixes),
		];
		for (key, value) in named {
			if let Some(value) = value {
				properties.insert(key.to_string(), value.clone());
			}
		}

		if properties.is_empty() {
			debug!("No directory properties configured, using defaults");
			Ok(defaults)
		} else {
			Ok(properties)
		}
	}
}

fn read_properties_file(
	path: &Path,
) -> Result<BTreeMap<String, String>, NamingError> {
	let file_error = |reason: String| NamingError::PropertiesFile {
		path: path.to_path_buf(),
		reason,
	};
	let content =
		std::fs::read_to_string(path).map_err(|e| file_error(e.to_string()))?;
	parse_properties(&content).map_err(file_error)
}

/// Parses `key=value` (or `key: value`) lines. Blank lines and lines
/// starting with `#` or `!` are skipped.
fn parse_properties(content: &str) -> Result<BTreeMap<String, String>, String> {
	let mut properties = BTreeMap::new();
	for (index, line) in content.lines().enumerate() {
		let line = line.trim();
		if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
			continue;
		}
		let Some((key, value)) = line.split_once(['=', ':']) else {
			return Err(format!("line {}: expected key=value", index + 1));
		};
		let key = key.trim();
		if key.is_empty() {
			return Err(format!("line {}: empty key", index + 1));
		}
		properties.insert(key.to_string(), value.trim().to_string());
	}
	Ok(properties)
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use super::*;
	use crate::broker::memory::MemoryBroker;

	fn defaults() -> BTreeMap<String, String> {
		BTreeMap::from([(PROVIDER_URL.to_string(), "default://".to_string())])
	}

	#[test]
	fn test_defaults_used_only_when_nothing_configured() {
		let empty = DirectoryProperties::default();
		assert_eq!(empty.to_properties(defaults()).unwrap(), defaults());

		let configured = DirectoryProperties {
			context_factory: Some("memory".to_string()),
			..Default::default()
		};
		let properties = configured.to_properties(defaults()).unwrap();
		assert_eq!(properties.len(), 1);
		assert_eq!(properties[CONTEXT_FACTORY], "memory");
		assert!(!properties.contains_key(PROVIDER_URL));
	}

	#[test]
	fn test_named_settings_override_file_and_map() {
		let path = std::env::temp_dir().join(format!(
			"bean-router-directory-{}.properties",
			uuid::Uuid::new_v4()
		));
		let mut file = std::fs::File::create(&path).unwrap();
		writeln!(file, "broker_user=router").unwrap();
		writeln!(file, "region=eu").unwrap();
		drop(file);

		let props = DirectoryProperties {
			provider_url: Some("mqtt://localhost:1883".to_string()),
			properties_file: Some(path.clone()),
			properties: BTreeMap::from([
				("region".to_string(), "us".to_string()),
				("zone".to_string(), "a".to_string()),
			]),
			..Default::default()
		};
		let properties = props.to_properties(defaults()).unwrap();
		std::fs::remove_file(&path).unwrap();

		assert_eq!(properties["broker_user"], "router");
		assert_eq!(properties["region"], "eu");
		assert_eq!(properties["zone"], "a");
		assert_eq!(properties[PROVIDER_URL], "mqtt://localhost:1883");
	}

	#[test]
	fn test_missing_properties_file_is_an_error() {
		let props = DirectoryProperties {
			properties_file: Some(PathBuf::from("/nonexistent/directory.properties")),
			..Default::default()
		};
		let err = props.to_properties(defaults()).unwrap_err();
		assert!(matches!(err, NamingError::PropertiesFile { .. }));
	}

	#[test]
	fn test_properties_parsing() {
		let properties = parse_properties(
			"# broker settings\n\n! legacy\nbroker_user = router\nregion: eu\nurl=mqtt://host:1883?a=b\n",
		)
		.unwrap();
		assert_eq!(properties.len(), 3);
		assert_eq!(properties["broker_user"], "router");
		assert_eq!(properties["region"], "eu");
		assert_eq!(properties["url"], "mqtt://host:1883?a=b");

		let err = parse_properties("region=eu\nbroken\n").unwrap_err();
		assert!(err.contains("line 2"), "{err}");
		assert!(parse_properties(" = value").is_err());
	}

	#[tokio::test]
	async fn test_static_directory_lookup() {
		let broker = MemoryBroker::new();
		let directory = StaticDirectory::new();
		directory
			.bind_connection_factory(
				"ConnectionFactory",
				Arc::new(broker.connection_factory()),
			)
			.bind_destination(broker.queue("orders"));

		let entry = directory
			.lookup("ConnectionFactory", &BTreeMap::new())
			.await
			.unwrap();
		assert_eq!(entry.kind_name(), "connection factory");

		let entry = directory.lookup("orders", &BTreeMap::new()).await.unwrap();
		assert_eq!(entry.kind_name(), "destination");

		let err = directory
			.lookup("missing", &BTreeMap::new())
			.await
			.unwrap_err();
		assert_eq!(
			err,
			NamingError::NotBound {
				name: "missing".to_string()
			}
		);

		assert!(directory.unbind("orders").is_some());
		assert!(directory.lookup("orders", &BTreeMap::new()).await.is_err());
	}
}

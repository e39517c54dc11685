//! Correlation id templates and their assignment to outgoing messages.

use std::collections::BTreeMap;
use std::fmt::{self, Debug, Display};
use std::sync::Arc;

use arcstr::ArcStr;
use smallvec::SmallVec;
use thiserror::Error;

use crate::message::{MessageError, OutgoingMessage};
use crate::value::ValueLookup;

/// Errors parsing or rendering a correlation template.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
	/// A `${` was never closed
	#[error("Unterminated placeholder in template '{pattern}'")]
	Unterminated {
		/// The invalid pattern
		pattern: String,
	},

	/// `${}` with nothing inside
	#[error("Empty placeholder in template '{pattern}'")]
	EmptyPlaceholder {
		/// The invalid pattern
		pattern: String,
	},

	/// The model has no value for a placeholder
	#[error("No value for '{name}' while rendering template '{pattern}'")]
	MissingValue {
		/// Placeholder name
		name: String,
		/// Template being rendered
		pattern: String,
	},
}

/// Failure computing or applying a correlation id. Fatal to one publish.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CorrelationAssignmentError {
	/// Template could not be rendered against the current values
	#[error("Failed to render correlation id: {0}")]
	Render(#[from] TemplateError),

	/// The rendered id was rejected by the message
	#[error("Failed to set correlation id '{id}' on message: {source}")]
	Apply {
		/// Rendered id
		id: String,
		/// Reason it was rejected
		#[source]
		source: MessageError,
	},
}

/// Segment of a parsed correlation template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSegment {
	/// Text copied verbatim
	Literal(String),
	/// `${name}` placeholder, possibly dotted (`order.id`)
	Placeholder(String),
}

/// Parsed `${name}` template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationTemplate {
	pattern: ArcStr,
	segments: SmallVec<[TemplateSegment; 4]>,
}

impl CorrelationTemplate {
	/// Parses `pattern`. A `$` not followed by `{` is literal text.
	pub fn parse(pattern: impl Into<ArcStr>) -> Result<Self, TemplateError> {
		let pattern = pattern.into();
		let mut segments = SmallVec::new();
		let mut literal = String::new();
		let mut rest = pattern.as_str();

		while let Some(start) = rest.find("${") {
			literal.push_str(&rest[.. start]);
			let after = &rest[start + 2 ..];
			let end = after.find('}').ok_or_else(|| TemplateError::Unterminated {
				pattern: pattern.to_string(),
			})?;
			let name = after[.. end].trim();
			if name.is_empty() {
				return Err(TemplateError::EmptyPlaceholder {
					pattern: pattern.to_string(),
				});
			}
			if !literal.is_empty() {
				segments.push(TemplateSegment::Literal(std::mem::take(
					&mut literal,
				)));
			}
			segments.push(TemplateSegment::Placeholder(name.to_string()));
			rest = &after[end + 1 ..];
		}
		literal.push_str(rest);
		if !literal.is_empty() {
			segments.push(TemplateSegment::Literal(literal));
		}

		Ok(Self { pattern, segments })
	}

	/// The original pattern text.
	pub fn pattern(&self) -> &ArcStr {
		&self.pattern
	}

	/// Parsed segments.
	pub fn segments(&self) -> &[TemplateSegment] {
		&self.segments
	}

	/// Substitutes every placeholder from `model`.
	pub fn render(
		&self,
		model: &BTreeMap<String, String>,
	) -> Result<String, TemplateError> {
		let mut out = String::with_capacity(self.pattern.len() + 16);
		for segment in &self.segments {
			match segment {
				| TemplateSegment::Literal(text) => out.push_str(text),
				| TemplateSegment::Placeholder(name) => {
					let value = model.get(name).ok_or_else(|| {
						TemplateError::MissingValue {
							name: name.clone(),
							pattern: self.pattern.to_string(),
						}
					})?;
					out.push_str(value);
				}
			}
		}
		Ok(out)
	}
}

impl Display for CorrelationTemplate {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.pattern)
	}
}

/// Renders a pattern against a string model.
pub trait TemplateRenderer: Debug + Send + Sync {
	/// Checks a pattern once at configuration time.
	fn validate(&self, pattern: &str) -> Result<(), TemplateError> {
		let _ = pattern;
		Ok(())
	}

	/// Renders `pattern` with `model`.
	fn render(
		&self,
		pattern: &str,
		model: &BTreeMap<String, String>,
	) -> Result<String, TemplateError>;
}

/// Built-in renderer for `${name}` placeholders.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderRenderer;

impl TemplateRenderer for PlaceholderRenderer {
	fn validate(&self, pattern: &str) -> Result<(), TemplateError> {
		CorrelationTemplate::parse(pattern).map(|_| ())
	}

	fn render(
		&self,
		pattern: &str,
		model: &BTreeMap<String, String>,
	) -> Result<String, TemplateError> {
		CorrelationTemplate::parse(pattern)?.render(model)
	}
}

/// Sets the correlation id of outgoing messages from an optional pattern.
#[derive(Debug, Clone)]
pub struct CorrelationAssigner {
	pattern: Option<ArcStr>,
	renderer: Arc<dyn TemplateRenderer>,
}

impl CorrelationAssigner {
	/// Assigner that leaves messages untouched.
	pub fn disabled() -> Self {
		Self {
			pattern: None,
			renderer: Arc::new(PlaceholderRenderer),
		}
	}

	/// Assigner for `pattern` using the built-in renderer.
	pub fn new(pattern: Option<&str>) -> Result<Self, TemplateError> {
		Self::with_renderer(pattern, Arc::new(PlaceholderRenderer))
	}

	/// Assigner for `pattern` using a custom renderer.
	pub fn with_renderer(
		pattern: Option<&str>,
		renderer: Arc<dyn TemplateRenderer>,
	) -> Result<Self, TemplateError> {
		if let Some(pattern) = pattern {
			renderer.validate(pattern)?;
		}
		Ok(Self {
			pattern: pattern.map(ArcStr::from),
			renderer,
		})
	}

	/// The configured pattern.
	pub fn pattern(&self) -> Option<&str> {
		self.pattern.as_deref()
	}

	/// Builds the string model from a snapshot of `values`, flattening
	/// nested maps into dotted keys.
	pub fn model(values: &dyn ValueLookup) -> BTreeMap<String, String> {
		let mut model = BTreeMap::new();
		for (key, value) in values.merged_view() {
			value.flatten_into(&key, &mut model);
		}
		model
	}

	/// Returns `message` with its correlation id set from the pattern.
	/// Without a pattern the message is returned unchanged.
	pub fn assign(
		&self,
		mut message: OutgoingMessage,
		values: &dyn ValueLookup,
	) -> Result<OutgoingMessage, CorrelationAssignmentError> {
		let Some(pattern) = &self.pattern else {
			return Ok(message);
		};
		let id = self.renderer.render(pattern, &Self::model(values))?;
		message
			.set_correlation_id(id.clone())
			.map_err(|source| CorrelationAssignmentError::Apply { id, source })?;
		Ok(message)
	}
}

impl Default for CorrelationAssigner {
	fn default() -> Self {
		Self::disabled()
	}
}

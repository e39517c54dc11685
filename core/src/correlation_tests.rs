//! Tests for correlation templates and assignment

use std::collections::BTreeMap;

use crate::correlation::{
	CorrelationAssigner, CorrelationAssignmentError, CorrelationTemplate,
	TemplateError, TemplateSegment,
};
use crate::message::{MessageBody, MessageError, OutgoingMessage, MAX_CORRELATION_ID_LEN};
use crate::value::{BeanContext, Value};

fn message() -> OutgoingMessage {
	OutgoingMessage::new(MessageBody::Text("body".to_string()))
}

#[test]
fn test_parse_segments() {
	let template = CorrelationTemplate::parse("batch-${batch}/${ order.id }$x").unwrap();
	assert_eq!(template.segments(), &[
		TemplateSegment::Literal("batch-".to_string()),
		TemplateSegment::Placeholder("batch".to_string()),
		TemplateSegment::Literal("/".to_string()),
		TemplateSegment::Placeholder("order.id".to_string()),
		TemplateSegment::Literal("$x".to_string()),
	]);
	assert_eq!(template.to_string(), "batch-${batch}/${ order.id }$x");
}

#[test]
fn test_parse_errors() {
	assert!(matches!(
		CorrelationTemplate::parse("id-${order"),
		Err(TemplateError::Unterminated { .. })
	));
	assert!(matches!(
		CorrelationTemplate::parse("id-${ }"),
		Err(TemplateError::EmptyPlaceholder { .. })
	));
}

#[test]
fn test_render_reports_missing_name() {
	let template = CorrelationTemplate::parse("${a}-${b}").unwrap();
	let mut model = BTreeMap::new();
	model.insert("a".to_string(), "1".to_string());

	let err = template.render(&model).unwrap_err();
	assert_eq!(err, TemplateError::MissingValue {
		name: "b".to_string(),
		pattern: "${a}-${b}".to_string(),
	});
}

#[test]
fn test_assign_from_current_values() {
	let assigner = CorrelationAssigner::new(Some("item-${index}")).unwrap();
	let mut values = BeanContext::new();

	values.insert("index", 1_i32);
	let first = assigner.assign(message(), &values).unwrap();
	values.insert("index", 2_i32);
	let second = assigner.assign(message(), &values).unwrap();

	assert_eq!(first.correlation_id(), Some("item-1"));
	assert_eq!(second.correlation_id(), Some("item-2"));
}

#[test]
fn test_nested_values_use_dotted_names() {
	let mut order = BTreeMap::new();
	order.insert("id".to_string(), Value::from(77_i64));
	let values: BeanContext = [("order", Value::from(order))].into_iter().collect();

	let assigner = CorrelationAssigner::new(Some("order-${order.id}")).unwrap();
	let message = assigner.assign(message(), &values).unwrap();

	assert_eq!(message.correlation_id(), Some("order-77"));
}

#[test]
fn test_without_pattern_message_is_untouched() {
	let assigner = CorrelationAssigner::disabled();
	let message = assigner.assign(message(), &BeanContext::new()).unwrap();
	assert_eq!(message.correlation_id(), None);
	assert_eq!(assigner.pattern(), None);
}

#[test]
fn test_invalid_pattern_fails_at_construction() {
	assert!(CorrelationAssigner::new(Some("${")).is_err());
}

#[test]
fn test_unrenderable_pattern_fails_publish() {
	let assigner = CorrelationAssigner::new(Some("${missing}")).unwrap();
	let err = assigner.assign(message(), &BeanContext::new()).unwrap_err();
	assert!(matches!(err, CorrelationAssignmentError::Render(_)));
}

#[test]
fn test_rejected_id_is_reported() {
	let assigner = CorrelationAssigner::new(Some("${id}")).unwrap();
	let values: BeanContext = [("id", "x".repeat(MAX_CORRELATION_ID_LEN + 1))]
		.into_iter()
		.collect();

	let err = assigner.assign(message(), &values).unwrap_err();
	assert!(matches!(
		err,
		CorrelationAssignmentError::Apply {
			source: MessageError::CorrelationIdTooLong { .. },
			..
		}
	));
}

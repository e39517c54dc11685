//! Tests for the Router publish pipeline

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::broker::memory::{FaultPoint, MemoryBroker};
use crate::config::{ExecutionPhase, RouterConfig};
use crate::connection::LifecycleState;
use crate::correlation::{TemplateError, TemplateRenderer};
use crate::directory::StaticDirectory;
use crate::encoder::{EncodingError, MessageEncoder, MessageType};
use crate::error::{ConfigurationError, RouterError};
use crate::message::{MessageBody, OutgoingMessage};
use crate::router::Router;
use crate::value::{BeanContext, Value, ValueLookup};

fn directory(broker: &MemoryBroker) -> Arc<StaticDirectory> {
	let directory = StaticDirectory::new();
	directory
		.bind_connection_factory(
			"ConnectionFactory",
			Arc::new(broker.connection_factory()),
		)
		.bind_destination(broker.queue("orders"));
	Arc::new(directory)
}

async fn ready_router(broker: &MemoryBroker, config: RouterConfig) -> Router {
	let router = Router::new(config, directory(broker)).unwrap();
	router.initialize().await.unwrap();
	router
}

fn context(order: impl Into<Value>) -> BeanContext {
	let mut context = BeanContext::new();
	context.insert("order", order.into());
	context
}

#[tokio::test]
async fn test_publish_before_initialize_is_rejected() {
	let broker = MemoryBroker::new();
	let router =
		Router::new(RouterConfig::new("order", "orders"), directory(&broker))
			.unwrap();

	let err = router.publish(&context("1")).await.unwrap_err();
	assert!(matches!(
		err,
		RouterError::NotReady {
			state: LifecycleState::Uninitialized
		}
	));
	assert_eq!(broker.depth("orders"), 0);
}

#[tokio::test]
async fn test_publish_after_close_is_rejected() {
	let broker = MemoryBroker::new();
	let router = ready_router(&broker, RouterConfig::new("order", "orders")).await;
	router.close().await;

	let err = router.publish(&context("1")).await.unwrap_err();
	assert!(matches!(
		err,
		RouterError::NotReady {
			state: LifecycleState::Closed
		}
	));
}

#[tokio::test]
async fn test_invalid_configuration_is_rejected_up_front() {
	let broker = MemoryBroker::new();
	let err = Router::new(RouterConfig::default(), directory(&broker)).unwrap_err();
	assert!(matches!(err, ConfigurationError::MissingSetting { .. }));

	let config = RouterConfig::new("order", "orders").with_correlation_pattern("${");
	let err = Router::new(config, directory(&broker)).unwrap_err();
	assert!(matches!(err, ConfigurationError::Template(_)));
}

#[tokio::test]
async fn test_missing_value_fails_single_publish() {
	let broker = MemoryBroker::new();
	let router = ready_router(&broker, RouterConfig::new("order", "orders")).await;

	let err = router.publish(&BeanContext::new()).await.unwrap_err();
	assert!(matches!(
		err,
		RouterError::Encoding(EncodingError::MissingValue { .. })
	));

	router.publish(&context("2")).await.unwrap();
	assert_eq!(broker.depth("orders"), 1);
	router.close().await;
}

#[tokio::test]
async fn test_delivery_settings_are_stamped() {
	let broker = MemoryBroker::new();
	let config = RouterConfig::new("order", "orders")
		.with_priority(9)
		.with_delivery_mode(crate::message::DeliveryMode::NonPersistent);
	let router = ready_router(&broker, config).await;

	router.publish(&context("1")).await.unwrap();

	let received = broker.receive("orders").unwrap();
	assert_eq!(received.message().priority(), 9);
	assert!(!received.message().is_persistent());
	assert!(received.id().starts_with("ID:"));
	router.close().await;
}

#[tokio::test]
async fn test_send_failure_names_destination() {
	let broker = MemoryBroker::new();
	let router = ready_router(&broker, RouterConfig::new("order", "orders")).await;
	broker.fail_next(FaultPoint::Send);

	let err = router.publish(&context("1")).await.unwrap_err();

	assert!(err.is_transport());
	assert!(!err.is_backpressure());
	assert!(err.to_string().contains("orders"));
	router.close().await;
}

#[tokio::test]
async fn test_depth_check_failure_is_reported() {
	let broker = MemoryBroker::new();
	let router = ready_router(&broker, RouterConfig::new("order", "orders")).await;
	broker.fail_next(FaultPoint::Browse);

	let err = router.publish(&context("1")).await.unwrap_err();

	assert!(matches!(err, RouterError::AdmissionCheck { .. }));
	assert_eq!(broker.depth("orders"), 0);
	router.close().await;
}

#[tokio::test]
async fn test_transacted_publish_commits_each_send() {
	let broker = MemoryBroker::new();
	let config = RouterConfig::new("order", "orders").with_transacted(true);
	let router = ready_router(&broker, config).await;

	router.publish(&context("1")).await.unwrap();
	assert_eq!(broker.depth("orders"), 1);

	broker.fail_next(FaultPoint::Commit);
	let err = router.publish(&context("2")).await.unwrap_err();
	assert!(err.is_transport());

	router.publish(&context("3")).await.unwrap();
	let bodies: Vec<_> = broker
		.drain("orders")
		.into_iter()
		.map(|m| m.message().body().as_text().unwrap_or_default().to_string())
		.collect();
	assert_eq!(bodies, ["1", "3"]);
	router.close().await;
}

#[tokio::test]
async fn test_transacted_send_failure_rolls_back() {
	let broker = MemoryBroker::new();
	let config = RouterConfig::new("order", "orders").with_transacted(true);
	let router = ready_router(&broker, config).await;

	broker.fail_next(FaultPoint::Send);
	assert!(router.publish(&context("1")).await.is_err());
	router.publish(&context("2")).await.unwrap();

	let received = broker.drain("orders");
	assert_eq!(received.len(), 1);
	assert_eq!(received[0].message().body().as_text(), Some("2"));
	router.close().await;
}

#[tokio::test]
async fn test_consumes_matches_prefix() {
	let broker = MemoryBroker::new();
	let router =
		Router::new(RouterConfig::new("order", "orders"), directory(&broker))
			.unwrap();

	assert!(router.consumes("order"));
	assert!(router.consumes("order.id"));
	assert!(router.consumes("orderLines"));
	assert!(!router.consumes("customer"));
	assert!(!router.consumes("ord"));
}

#[tokio::test]
async fn test_visit_publishes_only_in_configured_phase() {
	let broker = MemoryBroker::new();
	let config = RouterConfig::new("order", "orders")
		.with_execution_phase(ExecutionPhase::Before);
	let router = ready_router(&broker, config).await;
	let values = context("1");

	assert!(!router.visit_after(&values).await.unwrap());
	assert_eq!(broker.depth("orders"), 0);
	assert!(router.visit_before(&values).await.unwrap());
	assert_eq!(broker.depth("orders"), 1);
	router.on_destroy().await;
}

#[tokio::test]
async fn test_lifecycle_hooks() {
	let broker = MemoryBroker::new();
	let router =
		Router::new(RouterConfig::new("order", "orders"), directory(&broker))
			.unwrap();

	router.on_init().await.unwrap();
	assert_eq!(router.state().await, LifecycleState::Ready);
	router.on_destroy().await;
	router.on_destroy().await;
	assert_eq!(router.state().await, LifecycleState::Closed);
	assert!(broker.open_handles().is_empty());
}

#[tokio::test]
async fn test_failed_start_up_can_still_be_destroyed() {
	let broker = MemoryBroker::new();
	broker.fail_next(FaultPoint::CreateProducer);
	let router =
		Router::new(RouterConfig::new("order", "orders"), directory(&broker))
			.unwrap();

	let err = router.on_init().await.unwrap_err();
	assert!(matches!(
		err,
		RouterError::Configuration(ConfigurationError::Resource { .. })
	));
	assert_eq!(router.state().await, LifecycleState::Failed);

	router.on_destroy().await;
	assert_eq!(router.state().await, LifecycleState::Closed);
	assert!(broker.open_handles().is_empty());
}

#[derive(Debug)]
struct ShoutingEncoder;

impl MessageEncoder for ShoutingEncoder {
	fn message_type(&self) -> MessageType {
		MessageType::Text
	}

	fn encode(
		&self,
		key: &str,
		values: &dyn ValueLookup,
	) -> Result<MessageBody, EncodingError> {
		let value = values.get(key).ok_or_else(|| EncodingError::MissingValue {
			key: key.to_string(),
		})?;
		Ok(MessageBody::Text(value.to_string().to_uppercase()))
	}
}

#[tokio::test]
async fn test_custom_encoder() {
	let broker = MemoryBroker::new();
	let router =
		Router::new(RouterConfig::new("order", "orders"), directory(&broker))
			.unwrap()
			.with_encoder(Box::new(ShoutingEncoder));
	router.initialize().await.unwrap();

	router.publish(&context("abc")).await.unwrap();

	let received = broker.receive("orders").unwrap();
	assert_eq!(received.message().body().as_text(), Some("ABC"));
	router.close().await;
}

/// Blocks its worker thread while encoding, like a costly serializer.
#[derive(Debug)]
struct SlowEncoder(Duration);

impl MessageEncoder for SlowEncoder {
	fn message_type(&self) -> MessageType {
		MessageType::Text
	}

	fn encode(
		&self,
		key: &str,
		values: &dyn ValueLookup,
	) -> Result<MessageBody, EncodingError> {
		std::thread::sleep(self.0);
		let value = values.get(key).ok_or_else(|| EncodingError::MissingValue {
			key: key.to_string(),
		})?;
		Ok(MessageBody::Text(value.to_string()))
	}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_during_encoding_skips_admission_wait() {
	let broker = MemoryBroker::new();
	broker.inject(
		&broker.queue("orders"),
		OutgoingMessage::new(MessageBody::Text("pending".to_string())),
	);
	let config = RouterConfig::new("order", "orders")
		.with_high_water_mark(1)
		.with_admission_timeout(Duration::from_secs(4))
		.with_poll_interval(Duration::from_millis(100));
	let router = Arc::new(
		Router::new(config, directory(&broker))
			.unwrap()
			.with_encoder(Box::new(SlowEncoder(Duration::from_millis(300)))),
	);
	router.initialize().await.unwrap();

	let pending = tokio::spawn({
		let router = router.clone();
		async move { router.publish(&context("late")).await }
	});
	tokio::time::sleep(Duration::from_millis(50)).await;

	let start = Instant::now();
	router.close().await;
	let elapsed = start.elapsed();

	assert!(elapsed < Duration::from_secs(2), "close took {elapsed:?}");
	pending.await.unwrap().unwrap();
	assert_eq!(router.state().await, LifecycleState::Closed);
	assert!(router.interrupt_handle().is_shut_down());
}

#[derive(Debug)]
struct ReversingRenderer;

impl TemplateRenderer for ReversingRenderer {
	fn render(
		&self,
		pattern: &str,
		_model: &BTreeMap<String, String>,
	) -> Result<String, TemplateError> {
		Ok(pattern.chars().rev().collect())
	}
}

#[tokio::test]
async fn test_custom_template_renderer() {
	let broker = MemoryBroker::new();
	let config = RouterConfig::new("order", "orders").with_correlation_pattern("abc");
	let router = Router::new(config, directory(&broker))
		.unwrap()
		.with_template_renderer(Arc::new(ReversingRenderer))
		.unwrap();
	router.initialize().await.unwrap();

	router.publish(&context("1")).await.unwrap();

	let received = broker.receive("orders").unwrap();
	assert_eq!(received.message().correlation_id(), Some("cba"));
	router.close().await;
}

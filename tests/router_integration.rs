//! End-to-end publishing through the public API against the in-process
//! broker: ordering, correlation ids and the three message encodings.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bean_router::prelude::*;
use bean_router::{MessageBody, ObjectPayload};
use bincode::{Decode, Encode};

fn wire(broker: &MemoryBroker, queue: &str) -> Arc<StaticDirectory> {
	let directory = StaticDirectory::new();
	directory
		.bind_connection_factory(
			"ConnectionFactory",
			Arc::new(broker.connection_factory()),
		)
		.bind_destination(broker.queue(queue));
	Arc::new(directory)
}

async fn started(broker: &MemoryBroker, config: RouterConfig) -> Router {
	let queue = config.destination_name().unwrap().to_string();
	let router = Router::new(config, wire(broker, &queue)).unwrap();
	router.on_init().await.unwrap();
	router
}

#[tokio::test]
async fn test_publishes_in_call_order_with_correlation_ids() {
	let broker = MemoryBroker::new();
	let config = RouterConfig::new("item", "items")
		.with_correlation_pattern("item-${index}");
	let router = started(&broker, config).await;

	let mut values = BeanContext::new();
	for index in 1 ..= 5_i32 {
		values.insert("index", index);
		values.insert("item", format!("payload {index}"));
		router.publish(&values).await.unwrap();
	}

	let received = broker.drain("items");
	let ids: Vec<_> = received
		.iter()
		.map(|m| m.message().correlation_id().unwrap_or_default().to_string())
		.collect();
	assert_eq!(ids, ["item-1", "item-2", "item-3", "item-4", "item-5"]);
	assert_eq!(
		received[0].message().body(),
		&MessageBody::Text("payload 1".to_string())
	);
	router.on_destroy().await;
	assert!(broker.open_handles().is_empty());
}

#[tokio::test]
async fn test_map_message_keeps_every_primitive_type() {
	let broker = MemoryBroker::new();
	let config =
		RouterConfig::new("reading", "readings").with_message_type(MessageType::Map);
	let router = started(&broker, config).await;

	let mut reading = BTreeMap::new();
	reading.insert("sensor".to_string(), Value::from("t-1"));
	reading.insert("sequence".to_string(), Value::from(7_i32));
	reading.insert("timestamp".to_string(), Value::from(1_700_000_000_000_i64));
	reading.insert("celsius".to_string(), Value::from(21.25_f64));
	reading.insert("humidity".to_string(), Value::from(0.4_f32));
	reading.insert("calibrated".to_string(), Value::from(true));
	reading.insert("zone".to_string(), Value::from(3_i16));
	reading.insert("floor".to_string(), Value::from(-1_i8));
	reading.insert("unit".to_string(), Value::from('C'));
	reading.insert("raw".to_string(), Value::from(vec![0xde_u8, 0xad]));
	reading.insert(
		"tags".to_string(),
		Value::from(vec![Value::from("indoor"), Value::from("north")]),
	);
	let values: BeanContext = [("reading", reading)].into_iter().collect();

	router.publish(&values).await.unwrap();

	let received = broker.receive("readings").unwrap();
	let map = received.message().body().as_map().unwrap();
	assert_eq!(map.get_string("sensor").as_deref(), Some("t-1"));
	assert_eq!(map.get_int("sequence"), Some(7));
	assert_eq!(map.get_long("timestamp"), Some(1_700_000_000_000));
	assert_eq!(map.get_double("celsius"), Some(21.25));
	assert_eq!(map.get_float("humidity"), Some(0.4));
	assert_eq!(map.get_boolean("calibrated"), Some(true));
	assert_eq!(map.get_short("zone"), Some(3));
	assert_eq!(map.get_byte("floor"), Some(-1));
	assert_eq!(map.get_char("unit"), Some('C'));
	assert_eq!(map.get_bytes("raw"), Some(&[0xde_u8, 0xad][..]));
	assert_eq!(map.get_string("tags").as_deref(), Some("[indoor, north]"));
	router.on_destroy().await;
}

#[tokio::test]
async fn test_map_message_rejects_scalar_value() {
	let broker = MemoryBroker::new();
	let config =
		RouterConfig::new("reading", "readings").with_message_type(MessageType::Map);
	let router = started(&broker, config).await;

	let values: BeanContext = [("reading", 42_i32)].into_iter().collect();
	let err = router.publish(&values).await.unwrap_err();

	assert!(matches!(err, RouterError::Encoding(_)));
	assert!(err.to_string().contains("reading"));
	assert_eq!(broker.depth("readings"), 0);
	router.on_destroy().await;
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
struct Invoice {
	number: u64,
	lines: Vec<String>,
}

impl fmt::Display for Invoice {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Invoice {}", self.number)
	}
}

#[tokio::test]
async fn test_object_message_decodes_to_original_value() {
	let broker = MemoryBroker::new();
	let config = RouterConfig::new("invoice", "invoices")
		.with_message_type(MessageType::Object)
		.with_correlation_pattern("${invoice}");
	let router = started(&broker, config).await;

	let invoice = Invoice {
		number: 1001,
		lines: vec!["widget".to_string(), "gadget".to_string()],
	};
	let mut values = BeanContext::new();
	values.insert("invoice", Value::serializable(invoice.clone()));
	router.publish(&values).await.unwrap();

	let received = broker.receive("invoices").unwrap();
	assert_eq!(received.message().correlation_id(), Some("Invoice 1001"));
	let bytes = received.message().body().as_object_bytes().unwrap();
	let decoded: Invoice = ObjectPayload::from_bytes(bytes)
		.unwrap()
		.decode_object()
		.unwrap()
		.unwrap();
	assert_eq!(decoded, invoice);
	router.on_destroy().await;
}

#[tokio::test]
async fn test_configuration_from_params_drives_publishing() {
	let broker = MemoryBroker::new();
	let config = RouterConfig::from_params([
		("beanId", "order"),
		("destinationName", "orders"),
		("priority", "8"),
		("deliveryMode", "non-persistent"),
		("timeToLive", "60000"),
		("correlationIdPattern", "order-${order}"),
		("executeBefore", "true"),
	])
	.unwrap();
	let router = started(&broker, config).await;
	let values: BeanContext = [("order", "A7")].into_iter().collect();

	assert!(!router.visit_after(&values).await.unwrap());
	assert!(router.visit_before(&values).await.unwrap());

	let received = broker.receive("orders").unwrap();
	let message = received.message();
	assert_eq!(message.priority(), 8);
	assert_eq!(message.delivery_mode(), DeliveryMode::NonPersistent);
	assert_eq!(message.time_to_live().as_millis(), 60_000);
	assert_eq!(message.correlation_id(), Some("order-A7"));
	assert!(received.expires_at().is_some());
	router.on_destroy().await;
}

#[tokio::test]
async fn test_topic_destinations_skip_admission() {
	let broker = MemoryBroker::new();
	let directory = StaticDirectory::new();
	directory
		.bind_connection_factory(
			"ConnectionFactory",
			Arc::new(broker.connection_factory()),
		)
		.bind_destination(broker.topic("events"));
	let config = RouterConfig::new("event", "events").with_high_water_mark(0);
	let router = Router::new(config, Arc::new(directory)).unwrap();
	router.on_init().await.unwrap();

	let values: BeanContext = [("event", "started")].into_iter().collect();
	for _ in 0 .. 3 {
		router.publish(&values).await.unwrap();
	}

	assert_eq!(broker.depth("events"), 3);
	router.on_destroy().await;
}

//! Demo publisher: pushes a batch of orders through a router while a slow
//! consumer drains the queue, so admission control can be watched at work.
//!
//! Router parameters come from `BEAN_ROUTER_<param>` variables (for example
//! `BEAN_ROUTER_highWaterMark=3`), read from the environment or a `.env`
//! file. Setting `MQTT_BROKER` publishes to that broker instead of the
//! in-process one.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bean_router::prelude::*;
use bean_router::{MqttDirectory, tracing_setup};
use tokio::time;
use tracing::{info, warn};

const PARAM_PREFIX: &str = "BEAN_ROUTER_";
const ORDERS: i64 = 20;

fn params() -> BTreeMap<String, String> {
	let mut params: BTreeMap<String, String> = [
		("beanId", "order"),
		("destinationName", "orders"),
		("correlationIdPattern", "order-${order.id}"),
		("messageType", "map"),
		("highWaterMark", "5"),
		("highWaterMarkTimeout", "10000"),
		("highWaterMarkPollFrequency", "100"),
	]
	.into_iter()
	.map(|(name, value)| (name.to_string(), value.to_string()))
	.collect();

	params.extend(std::env::vars().filter_map(|(name, value)| {
		name.strip_prefix(PARAM_PREFIX)
			.map(|param| (param.to_string(), value))
	}));
	params
}

fn order(id: i64) -> BeanContext {
	let mut order = BTreeMap::new();
	order.insert("id".to_string(), Value::from(id));
	order.insert("sku".to_string(), Value::from(format!("SKU-{}", id % 3)));
	order.insert("quantity".to_string(), Value::from((id % 5 + 1) as i32));

	let mut values = BeanContext::new();
	values.insert("order", order);
	values
}

/// Receives one message every `pace` until the queue stays empty.
async fn consume(broker: MemoryBroker, queue: String, pace: Duration) {
	let mut idle = 0;
	while idle < 10 {
		time::sleep(pace).await;
		match broker.receive(&queue) {
			| Some(message) => {
				idle = 0;
				info!(
					id = message.id(),
					correlation_id = message.message().correlation_id(),
					remaining = broker.depth(&queue),
					"Consumed"
				);
			}
			| None => idle += 1,
		}
	}
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	tracing_setup::setup(Some("info"));

	let config = RouterConfig::from_params(params())?;
	let queue = config.destination_name().unwrap_or("orders").to_string();

	let mut consumer = None;
	let directory: Arc<dyn Directory> = match std::env::var("MQTT_BROKER") {
		| Ok(url) => {
			info!(url = %url, "Publishing to MQTT broker");
			Arc::new(
				MqttDirectory::new(config.connection.factory_name.clone())
					.with_default_url(url),
			)
		}
		| Err(_) => {
			let broker = MemoryBroker::new();
			let directory = StaticDirectory::new();
			directory
				.bind_connection_factory(
					config.connection.factory_name.clone(),
					Arc::new(broker.connection_factory()),
				)
				.bind_destination(broker.queue(queue.clone()));
			consumer = Some(tokio::spawn(consume(
				broker,
				queue.clone(),
				Duration::from_millis(250),
			)));
			Arc::new(directory)
		}
	};

	let router = Router::new(config, directory)?;
	router.on_init().await?;

	for id in 1 ..= ORDERS {
		match router.visit_after(&order(id)).await {
			| Ok(_) => info!(id, "Published order"),
			| Err(e) if e.is_backpressure() => {
				warn!(id, error = %e, "Queue stayed full, giving up");
				break;
			}
			| Err(e) => warn!(id, error = %e, "Failed to publish order"),
		}
	}

	router.on_destroy().await;
	if let Some(consumer) = consumer {
		consumer.await?;
	}
	Ok(())
}

//! Admission control and shutdown behavior observed from outside the crate.
//!
//! Every test runs on a paused clock, so waits of several seconds complete
//! instantly while still being measured precisely.

use std::sync::Arc;
use std::time::Duration;

use bean_router::prelude::*;
use bean_router::LifecycleState;
use tokio::time::{self, Instant};

const CONFIG: &str = r#"{
	"value_key": "job",
	"destination_name": "jobs",
	"admission": {
		"high_water_mark": 2,
		"timeout": 5000,
		"poll_interval": 100
	}
}"#;

fn router(broker: &MemoryBroker, config: RouterConfig) -> Arc<Router> {
	let directory = StaticDirectory::new();
	directory
		.bind_connection_factory(
			"ConnectionFactory",
			Arc::new(broker.connection_factory()),
		)
		.bind_destination(broker.queue("jobs"));
	Arc::new(Router::new(config, Arc::new(directory)).unwrap())
}

fn job(name: &str) -> BeanContext {
	[("job", name)].into_iter().collect()
}

#[tokio::test(start_paused = true)]
async fn test_publish_waits_until_consumer_drains() {
	let broker = MemoryBroker::new();
	let router = router(&broker, RouterConfig::from_json(CONFIG).unwrap());
	router.on_init().await.unwrap();
	router.publish(&job("a")).await.unwrap();
	router.publish(&job("b")).await.unwrap();

	let start = Instant::now();
	let pending = tokio::spawn({
		let router = router.clone();
		async move { router.publish(&job("c")).await }
	});

	time::sleep(Duration::from_millis(1_050)).await;
	assert!(!pending.is_finished());
	assert_eq!(broker.receive("jobs").unwrap().message().body().as_text(), Some("a"));

	pending.await.unwrap().unwrap();
	let waited = start.elapsed();
	assert!(waited >= Duration::from_millis(1_050), "waited {waited:?}");
	assert!(waited < Duration::from_millis(1_300), "waited {waited:?}");
	assert_eq!(broker.depth("jobs"), 2);
	router.on_destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_publish_fails_after_timeout_without_sending() {
	let broker = MemoryBroker::new();
	let router = router(&broker, RouterConfig::from_json(CONFIG).unwrap());
	router.on_init().await.unwrap();
	router.publish(&job("a")).await.unwrap();
	router.publish(&job("b")).await.unwrap();

	let start = Instant::now();
	let err = router.publish(&job("c")).await.unwrap_err();
	let waited = start.elapsed();

	assert!(err.is_backpressure());
	assert!(matches!(
		err,
		RouterError::BackpressureTimeout {
			high_water_mark: 2,
			depth: 2,
			..
		}
	));
	assert!(err.to_string().contains("jobs"));
	assert!(waited >= Duration::from_secs(5), "waited {waited:?}");
	assert!(waited <= Duration::from_millis(5_100), "waited {waited:?}");
	assert_eq!(broker.depth("jobs"), 2);

	broker.receive("jobs");
	router.publish(&job("d")).await.unwrap();
	router.on_destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_expired_messages_free_capacity() {
	let broker = MemoryBroker::new();
	let config = RouterConfig::from_json(CONFIG)
		.unwrap()
		.with_time_to_live(Duration::from_secs(2));
	let router = router(&broker, config);
	router.on_init().await.unwrap();
	router.publish(&job("a")).await.unwrap();
	router.publish(&job("b")).await.unwrap();

	let start = Instant::now();
	router.publish(&job("c")).await.unwrap();

	assert!(start.elapsed() >= Duration::from_secs(2));
	assert_eq!(broker.depth("jobs"), 1);
	router.on_destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_disabled_admission_never_waits() {
	let broker = MemoryBroker::new();
	let config = RouterConfig::from_json(CONFIG)
		.unwrap()
		.with_admission(AdmissionConfig::disabled());
	let router = router(&broker, config);
	router.on_init().await.unwrap();

	let start = Instant::now();
	for i in 0 .. 50 {
		router.publish(&job(&format!("job-{i}"))).await.unwrap();
	}

	assert_eq!(start.elapsed(), Duration::ZERO);
	assert_eq!(broker.depth("jobs"), 50);
	router.on_destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_close_ends_a_pending_wait() {
	let broker = MemoryBroker::new();
	let router = router(&broker, RouterConfig::from_json(CONFIG).unwrap());
	router.on_init().await.unwrap();
	router.publish(&job("a")).await.unwrap();
	router.publish(&job("b")).await.unwrap();

	let start = Instant::now();
	let pending = tokio::spawn({
		let router = router.clone();
		async move { router.publish(&job("c")).await }
	});
	time::sleep(Duration::from_millis(500)).await;

	router.close().await;

	assert!(start.elapsed() < Duration::from_secs(1));
	pending.await.unwrap().unwrap();
	assert_eq!(router.state().await, LifecycleState::Closed);
	assert!(broker.open_handles().is_empty());
	assert!(matches!(
		router.publish(&job("d")).await,
		Err(RouterError::NotReady { .. })
	));
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_handle_admits_waiting_publish() {
	let broker = MemoryBroker::new();
	let router = router(&broker, RouterConfig::from_json(CONFIG).unwrap());
	router.on_init().await.unwrap();
	router.publish(&job("a")).await.unwrap();
	router.publish(&job("b")).await.unwrap();

	let interrupt = router.interrupt_handle();
	let pending = tokio::spawn({
		let router = router.clone();
		async move { router.publish(&job("c")).await }
	});
	time::sleep(Duration::from_millis(300)).await;
	interrupt.interrupt();

	pending.await.unwrap().unwrap();
	assert_eq!(broker.depth("jobs"), 3);
	router.on_destroy().await;
}

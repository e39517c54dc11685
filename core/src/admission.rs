//! Backpressure before each publish.
//!
//! [`AdmissionController::await_capacity`] counts the messages pending on a
//! queue and, while the count is at or above the high-water mark, sleeps for
//! the poll interval and counts again until the queue drains or the timeout
//! elapses. Each count enumerates the queue, so a check costs O(depth).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::{self, Instant};
use tracing::debug;

use crate::broker::{BrokerError, Destination, QueueBrowser, Session};
use crate::config::AdmissionConfig;

/// Why a publish could not be admitted.
#[derive(Debug, Error)]
pub enum AdmissionError {
	/// Depth stayed at or above the mark until the timeout
	#[error("destination depth {depth} did not drop below the high-water mark in time")]
	TimedOut {
		/// Depth observed at the last check
		depth: usize,
	},

	/// Counting the pending messages failed
	#[error("failed to inspect destination depth: {0}")]
	Inspection(#[from] BrokerError),
}

/// How a publish was admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
	/// Admission control is turned off
	Disabled,
	/// The destination cannot be inspected
	NotInspectable,
	/// Depth was below the mark, possibly after waiting
	Admitted {
		/// Time spent waiting for the destination to drain
		waited: Duration,
	},
	/// The wait was aborted through an [`InterruptHandle`]
	Interrupted,
}

#[derive(Debug, Default)]
struct WaitSignal {
	notify: Notify,
	shut_down: AtomicBool,
}

impl WaitSignal {
	fn is_shut_down(&self) -> bool {
		self.shut_down.load(Ordering::SeqCst)
	}
}

/// Aborts admission waits.
///
/// [`InterruptHandle::interrupt`] wakes every publish currently waiting on
/// the controller and lets it through; waits that start afterwards are
/// unaffected. [`InterruptHandle::shut_down`] is sticky: it also lets through
/// every wait that starts later, including one whose publish is still
/// encoding when it is called.
#[derive(Debug, Clone)]
pub struct InterruptHandle {
	signal: Arc<WaitSignal>,
}

impl InterruptHandle {
	/// Wakes all current waiters.
	pub fn interrupt(&self) {
		self.signal.notify.notify_waiters();
	}

	/// Ends current waits and skips all future ones.
	pub fn shut_down(&self) {
		self.signal.shut_down.store(true, Ordering::SeqCst);
		self.signal.notify.notify_waiters();
	}

	/// Whether [`InterruptHandle::shut_down`] was called.
	pub fn is_shut_down(&self) -> bool {
		self.signal.is_shut_down()
	}
}

/// Polling backpressure gate for one destination.
#[derive(Debug)]
pub struct AdmissionController {
	config: AdmissionConfig,
	signal: Arc<WaitSignal>,
}

impl AdmissionController {
	/// Creates a controller with the given settings.
	pub fn new(config: AdmissionConfig) -> Self {
		Self {
			config,
			signal: Arc::new(WaitSignal::default()),
		}
	}

	/// Settings in use.
	pub fn config(&self) -> &AdmissionConfig {
		&self.config
	}

	/// Handle that aborts waits on this controller.
	pub fn interrupt_handle(&self) -> InterruptHandle {
		InterruptHandle {
			signal: self.signal.clone(),
		}
	}

	/// Smallest depth that blocks a publish. A mark of zero admits only an
	/// empty destination.
	fn threshold(&self) -> usize {
		usize::try_from(self.config.high_water_mark.max(1)).unwrap_or(1)
	}

	/// Waits until `destination` holds fewer messages than the high-water
	/// mark.
	pub async fn await_capacity(
		&self,
		session: &dyn Session,
		destination: &Destination,
	) -> Result<Admission, AdmissionError> {
		if !self.config.is_enabled() {
			return Ok(Admission::Disabled);
		}
		if self.signal.is_shut_down() {
			debug!(destination = %destination, "Controller shut down, skipping admission check");
			return Ok(Admission::Interrupted);
		}
		let Some(browser) = session.create_browser(destination).await? else {
			debug!(destination = %destination, "Destination cannot be inspected, skipping admission check");
			return Ok(Admission::NotInspectable);
		};

		let result = self.wait_below_mark(browser.as_ref(), destination).await;
		if let Err(e) = browser.close().await {
			debug!(error = %e, "Failed to close queue browser");
		}
		result
	}

	async fn wait_below_mark(
		&self,
		browser: &dyn QueueBrowser,
		destination: &Destination,
	) -> Result<Admission, AdmissionError> {
		let threshold = self.threshold();
		let interrupted = self.signal.notify.notified();
		tokio::pin!(interrupted);
		interrupted.as_mut().enable();
		// Enabled before the flag is read, so a later shutdown wakes the select.
		if self.signal.is_shut_down() {
			return Ok(Admission::Interrupted);
		}

		let start = Instant::now();
		let deadline = start + self.config.timeout;
		let mut depth = browser.depth().await?;

		if depth >= threshold {
			debug!(
				destination = %destination,
				depth,
				high_water_mark = self.config.high_water_mark,
				"Destination reached its high-water mark, waiting for it to drain"
			);
		}

		while depth >= threshold && Instant::now() < deadline {
			tokio::select! {
				_ = &mut interrupted => {
					debug!(destination = %destination, depth, "Admission wait interrupted");
					return Ok(Admission::Interrupted);
				}
				_ = time::sleep(self.config.poll_interval) => {}
			}
			depth = browser.depth().await?;
		}

		if depth >= threshold {
			return Err(AdmissionError::TimedOut { depth });
		}
		Ok(Admission::Admitted {
			waited: start.elapsed(),
		})
	}
}

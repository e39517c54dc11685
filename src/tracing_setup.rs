//! Subscriber setup for binaries and demos embedding the router.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable that turns logging off even when `RUST_LOG` is set.
pub const DISABLE_VAR: &str = "RUST_LOG_DISABLE";

/// Setup tracing based on environment or explicit configuration
///
/// Priority (first match wins):
/// 1. If `RUST_LOG_DISABLE` is set - no tracing
/// 2. If `force_level` provided - use it
/// 3. If `RUST_LOG` set - use environment configuration
/// 4. Otherwise - no tracing (silent)
///
/// A `.env` file in the working directory is loaded first so `RUST_LOG` can
/// live there. Calling this twice keeps the first subscriber.
pub fn setup(force_level: Option<&str>) {
	dotenv::dotenv().ok();

	if std::env::var(DISABLE_VAR).is_ok() {
		return;
	}

	let filter = if let Some(level) = force_level {
		tracing_subscriber::EnvFilter::new(level)
	} else if std::env::var("RUST_LOG").is_ok() {
		tracing_subscriber::EnvFilter::try_from_default_env()
			.unwrap_or_else(|_| "info".into())
	} else {
		return;
	};

	let _ = tracing_subscriber::registry()
		.with(filter)
		.with(
			tracing_subscriber::fmt::layer()
				.with_target(true)
				.with_thread_ids(false)
				.with_thread_names(false)
				.with_file(false)
				.with_line_number(false)
				.compact(),
		)
		.try_init();
}

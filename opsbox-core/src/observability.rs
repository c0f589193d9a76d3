//! Logging and metric descriptions.
//!
//! Log output goes to stderr through `tracing_subscriber`. `RUST_LOG` takes
//! precedence over the configured level. Counters are emitted through the
//! `metrics` facade and are no-ops unless the embedding binary installs a
//! recorder.

use metrics::describe_counter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global tracing subscriber.
///
/// `level` is used when `RUST_LOG` is unset or invalid. Calling this more
/// than once is harmless; later calls leave the first subscriber in place.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let initialized = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()
        .is_ok();

    if initialized {
        register_metrics();
        tracing::debug!(level, "Observability initialized");
    }
}

/// Register descriptions for every counter opsbox emits.
pub fn register_metrics() {
    describe_counter!("opsbox_compose_up_total", "Compose sets brought up");
    describe_counter!("opsbox_compose_down_total", "Compose sets brought down");
    describe_counter!("opsbox_instances_deleted_total", "Instances deleted during compose down");
    describe_counter!("opsbox_bridge_created_total", "Compose bridges created");
    describe_counter!("opsbox_bridge_deleted_total", "Compose bridges deleted");
    describe_counter!("opsbox_tap_created_total", "TAP devices created for compose members");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        init("debug");
        init("not a valid filter ][");
        tracing::info!("still logging");
    }
}

//! Tracing subscriber initialization.

use crate::config::LoggingConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Crates whose events are shown when `RUST_LOG` is unset
const SERVICE_TARGETS: [&str; 3] = ["queue_salvage", "queue_salvage_core", "queue_runtime"];

/// Filter directives for `level` applied to the service crates
pub fn default_directives(level: &str) -> String {
    let mut directives: Vec<String> = SERVICE_TARGETS
        .iter()
        .map(|target| format!("{}={}", target, level))
        .collect();
    directives.push(format!("audit={}", level));
    directives.join(",")
}

/// Install the global subscriber
///
/// Logs go to stderr so command output on stdout stays machine readable.
/// Returns an error if a subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(&config.level)));

    let json_layer = config.json_format.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    let text_layer =
        (!config.json_format).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
}

/// Install the global subscriber, reporting a failure on stderr
///
/// Returns whether the subscriber was installed.
pub fn init_or_report(config: &LoggingConfig) -> bool {
    match init(config) {
        Ok(()) => true,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            false
        }
    }
}

#[cfg(test)]
#[path = "logging_tests.rs"]
mod tests;

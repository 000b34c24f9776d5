//! Tests for logging initialization.

use super::*;

/// Verify the default directives cover every service crate at the given level
#[test]
fn test_default_directives() {
    let directives = default_directives("debug");

    assert_eq!(
        directives,
        "queue_salvage=debug,queue_salvage_core=debug,queue_runtime=debug,audit=debug"
    );
    assert!(EnvFilter::try_new(&directives).is_ok());
}

/// Verify a second initialization reports an error instead of panicking
#[test]
fn test_second_init_fails() {
    let config = LoggingConfig::default();
    let _ = init(&config);

    assert!(init(&config).is_err());
}

/// Verify a failed initialization is reported rather than dropped
#[test]
fn test_init_or_report_returns_outcome() {
    let config = LoggingConfig::default();
    let _ = init(&config);

    assert!(!init_or_report(&config));
}

//! Tests for [`ServiceConfig`] loading and validation.

use super::*;
use queue_runtime::ProviderConfig;
use tempfile::TempDir;

fn write_config(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("service.yaml");
    std::fs::write(&path, contents).unwrap();
    (temp_dir, path)
}

// ============================================================================
// Defaults
// ============================================================================

mod default_tests {
    use super::*;

    /// Verify the built-in defaults pass validation
    #[test]
    fn test_defaults_are_valid() {
        let config = ServiceConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.sweep.interval_seconds, 300);
        assert_eq!(config.sessions.expiry(), chrono::Duration::minutes(20));
        assert_eq!(config.staging.backend, StagingBackend::Filesystem);
        assert_eq!(config.audit.backend, AuditBackend::Tracing);
        assert!(matches!(config.broker.queue.provider, ProviderConfig::InMemory(_)));
    }

    /// Verify the defaults written out as YAML load back unchanged
    #[test]
    fn test_defaults_round_trip_through_file() {
        let yaml = serde_yaml::to_string(&ServiceConfig::default()).unwrap();
        let (_temp, path) = write_config(&yaml);

        let loaded = ServiceConfig::load(Some(&path)).unwrap();

        assert_eq!(loaded.broker.batch_size, 100);
        assert_eq!(loaded.staging.batch_size, 100);
        assert_eq!(loaded.sweep.page_size, 100);
    }
}

// ============================================================================
// Loading
// ============================================================================

mod load_tests {
    use super::*;

    /// Verify a partial file overrides only the fields it names
    #[test]
    fn test_partial_file_keeps_defaults() {
        let (_temp, path) = write_config(
            "sweep:\n  interval_seconds: 60\nstaging:\n  backend: memory\naudit:\n  backend: file\n  path: /var/log/replays.jsonl\n",
        );

        let config = ServiceConfig::load(Some(&path)).unwrap();

        assert_eq!(config.sweep.interval_seconds, 60);
        assert_eq!(config.sweep.page_size, 100);
        assert_eq!(config.staging.backend, StagingBackend::Memory);
        assert_eq!(config.audit.backend, AuditBackend::File);
        assert_eq!(config.audit.path, PathBuf::from("/var/log/replays.jsonl"));
    }

    /// Verify the broker provider section selects the transport
    #[test]
    fn test_provider_selection() {
        let (_temp, path) = write_config(
            "broker:\n  queue:\n    provider:\n      type: in_memory\n      queues:\n        - orders\n        - orders-errors\n",
        );

        let config = ServiceConfig::load(Some(&path)).unwrap();

        match config.broker.queue.provider {
            ProviderConfig::InMemory(memory) => {
                assert_eq!(memory.queues, vec!["orders", "orders-errors"]);
            }
            other => panic!("expected in-memory provider, got {:?}", other),
        }
    }

    /// Verify a missing explicit file is an error
    #[test]
    fn test_missing_explicit_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        let result = ServiceConfig::load(Some(&temp_dir.path().join("absent.yaml")));

        assert!(matches!(result, Err(ConfigError::Load { .. })));
    }

    /// Verify a value of the wrong type is an error rather than a default
    #[test]
    fn test_malformed_value_fails() {
        let (_temp, path) = write_config("sweep:\n  interval_seconds: soon\n");

        let result = ServiceConfig::load(Some(&path));

        assert!(matches!(result, Err(ConfigError::Load { .. })));
    }

    /// Verify loaded values are validated
    #[test]
    fn test_loaded_values_validated() {
        let (_temp, path) = write_config("sessions:\n  expiry_minutes: 0\n");

        let result = ServiceConfig::load(Some(&path));

        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }
}

// ============================================================================
// Validation
// ============================================================================

mod validation_tests {
    use super::*;

    fn invalid_field(config: &ServiceConfig) -> String {
        match config.validate() {
            Err(ConfigError::Invalid { field, .. }) => field,
            other => panic!("expected invalid configuration, got {:?}", other),
        }
    }

    /// Verify batch sizes are bounded by the store's batch limit
    #[test]
    fn test_batch_size_bounds() {
        let mut config = ServiceConfig::default();
        config.broker.batch_size = 0;
        assert_eq!(invalid_field(&config), "broker.batch_size");

        config.broker.batch_size = 101;
        assert_eq!(invalid_field(&config), "broker.batch_size");

        let mut config = ServiceConfig::default();
        config.staging.batch_size = 101;
        assert_eq!(invalid_field(&config), "staging.batch_size");
    }

    /// Verify queue patterns must be non-empty valid regexes
    #[test]
    fn test_patterns_validated() {
        let mut config = ServiceConfig::default();
        config.broker.error_queue_pattern = "(".to_string();
        assert_eq!(invalid_field(&config), "broker.error_queue_pattern");

        let mut config = ServiceConfig::default();
        config.broker.error_queue_suffix_pattern = " ".to_string();
        assert_eq!(invalid_field(&config), "broker.error_queue_suffix_pattern");
    }

    /// Verify zero durations and page sizes are rejected
    #[test]
    fn test_zero_values_rejected() {
        let mut config = ServiceConfig::default();
        config.sweep.interval_seconds = 0;
        assert_eq!(invalid_field(&config), "sweep.interval_seconds");

        let mut config = ServiceConfig::default();
        config.sweep.page_size = 0;
        assert_eq!(invalid_field(&config), "sweep.page_size");

        let mut config = ServiceConfig::default();
        config.sweep.max_pages_per_session = 0;
        assert_eq!(invalid_field(&config), "sweep.max_pages_per_session");
    }

    /// Verify file backends need a path
    #[test]
    fn test_file_backends_need_paths() {
        let mut config = ServiceConfig::default();
        config.staging.data_directory = PathBuf::new();
        assert_eq!(invalid_field(&config), "staging.data_directory");

        config.staging.backend = StagingBackend::Memory;
        assert!(config.validate().is_ok());

        config.audit.backend = AuditBackend::File;
        config.audit.path = PathBuf::new();
        assert_eq!(invalid_field(&config), "audit.path");
    }
}

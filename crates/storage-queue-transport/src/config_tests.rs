//! Tests for transport options.

use super::*;
use std::io::Write;

fn options_file(extension: &str, contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(extension)
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn fake_environment(vars: &[(&str, &str)]) -> config::Environment {
    environment().source(Some(
        vars.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    ))
}

// ============================================================================
// Defaults and Validation
// ============================================================================

mod validation {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = TransportOptions::default();

        assert!(options.automatically_create_queues);
        assert!(options.validate_queue_names);
        assert_eq!(options.prefetch_count, None);
        assert!(!options.automatic_lease_renewal);
        assert_eq!(options.visibility_timeout, Duration::from_secs(30));
        assert_eq!(options.lease_renewal_interval, Duration::from_secs(10));
        assert!(options.use_native_deferred_messages);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_prefetch_count_must_fit_service_batch() {
        for (prefetch, valid) in [(0, false), (1, true), (32, true), (33, false)] {
            let options = TransportOptions {
                prefetch_count: Some(prefetch),
                ..Default::default()
            };

            assert_eq!(options.validate().is_ok(), valid, "prefetch {}", prefetch);
        }
    }

    #[test]
    fn test_visibility_timeout_bounds() {
        let zero = TransportOptions {
            visibility_timeout: Duration::ZERO,
            ..Default::default()
        };
        let too_long = TransportOptions {
            visibility_timeout: MAX_VISIBILITY_TIMEOUT + Duration::from_secs(1),
            ..Default::default()
        };

        assert!(zero.validate().is_err());
        assert!(too_long.validate().is_err());
    }

    #[test]
    fn test_renewal_interval_must_leave_room_before_expiry() {
        let options = |interval: u64| TransportOptions {
            automatic_lease_renewal: true,
            visibility_timeout: Duration::from_secs(30),
            lease_renewal_interval: Duration::from_secs(interval),
            ..Default::default()
        };

        assert!(options(10).validate().is_ok());
        assert!(options(14).validate().is_ok());
        assert!(options(15).validate().is_err());
        assert!(options(0).validate().is_err());
    }

    #[test]
    fn test_renewal_interval_ignored_when_renewal_disabled() {
        let options = TransportOptions {
            automatic_lease_renewal: false,
            lease_renewal_interval: Duration::from_secs(60),
            ..Default::default()
        };

        assert!(options.validate().is_ok());
    }
}

// ============================================================================
// Loading
// ============================================================================

mod loading {
    use super::*;

    #[test]
    fn test_load_without_sources_gives_defaults() {
        let options = TransportOptions::load_with_environment(None, fake_environment(&[])).unwrap();

        assert_eq!(options, TransportOptions::default());
    }

    #[test]
    fn test_load_toml_file() {
        let file = options_file(
            ".toml",
            r#"
prefetch_count = 16
automatic_lease_renewal = true
visibility_timeout = 60
lease_renewal_interval = 7.5
"#,
        );

        let options =
            TransportOptions::load_with_environment(Some(file.path()), fake_environment(&[]))
                .unwrap();

        assert_eq!(options.prefetch_count, Some(16));
        assert!(options.automatic_lease_renewal);
        assert_eq!(options.visibility_timeout, Duration::from_secs(60));
        assert_eq!(options.lease_renewal_interval, Duration::from_millis(7_500));
        assert!(options.automatically_create_queues);
    }

    #[test]
    fn test_load_yaml_file() {
        let file = options_file(
            ".yaml",
            "validate_queue_names: false\nuse_native_deferred_messages: false\n",
        );

        let options =
            TransportOptions::load_with_environment(Some(file.path()), fake_environment(&[]))
                .unwrap();

        assert!(!options.validate_queue_names);
        assert!(!options.use_native_deferred_messages);
    }

    #[test]
    fn test_environment_overrides_file() {
        let file = options_file(".json", r#"{"prefetch_count": 4}"#);

        let options = TransportOptions::load_with_environment(
            Some(file.path()),
            fake_environment(&[
                ("STORAGE_QUEUE__PREFETCH_COUNT", "8"),
                ("STORAGE_QUEUE__AUTOMATICALLY_CREATE_QUEUES", "false"),
            ]),
        )
        .unwrap();

        assert_eq!(options.prefetch_count, Some(8));
        assert!(!options.automatically_create_queues);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = TransportOptions::load_with_environment(
            Some(Path::new("/nonexistent/options.toml")),
            fake_environment(&[]),
        );

        assert!(matches!(result, Err(ConfigurationError::Parsing { .. })));
    }

    #[test]
    fn test_loaded_options_are_validated() {
        let file = options_file(".toml", "prefetch_count = 100\n");

        let result =
            TransportOptions::load_with_environment(Some(file.path()), fake_environment(&[]));

        assert!(matches!(result, Err(ConfigurationError::Invalid { .. })));
    }
}

// ============================================================================
// Serialization
// ============================================================================

#[test]
fn test_durations_serialize_as_seconds() {
    let options = TransportOptions {
        visibility_timeout: Duration::from_millis(1_500),
        ..Default::default()
    };

    let value = serde_json::to_value(&options).unwrap();

    assert_eq!(value["visibility_timeout"], 1.5);
    assert_eq!(value["lease_renewal_interval"], 10.0);
}

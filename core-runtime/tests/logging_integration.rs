//! Integration tests for logging system

use core_runtime::logging::{init_logging, redact_if_sensitive, LogFormat, LogLevel, LoggingConfig};

#[test]
fn test_init_logging_once_per_process() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Debug);

    init_logging(config.clone()).expect("first initialization succeeds");
    tracing::info!(mover = "rsync", "Logging initialized");

    // A global subscriber is already installed
    assert!(init_logging(config).is_err());
}

#[test]
fn test_credentials_are_redacted() {
    assert_eq!(redact_if_sensitive("psk", "deadbeef"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("RESTIC_PASSWORD", "pw"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("rclone_config", "[remote]"), "[REDACTED]");
}

#[test]
fn test_repository_url_keeps_host() {
    let redacted = redact_if_sensitive("repository", "rest:https://u:p@backup.local/repo");
    assert_eq!(redacted, "rest:https://[REDACTED]@backup.local/repo");
    assert!(!redacted.contains("u:p"));
}

#[test]
fn test_plain_values_pass_through() {
    assert_eq!(redact_if_sensitive("name", "database"), "database");
    assert_eq!(redact_if_sensitive("address", "10.0.0.12"), "10.0.0.12");
}

#[test]
fn test_config_chaining() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Json)
        .with_level(LogLevel::Warn)
        .with_spans(false)
        .with_target(false)
        .with_thread_info(true);

    assert_eq!(config.format, LogFormat::Json);
    assert_eq!(config.level, LogLevel::Warn);
    assert!(!config.enable_spans);
    assert!(!config.display_target);
    assert!(config.display_thread_info);
}

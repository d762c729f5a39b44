use std::path::PathBuf;

use jtrace_config::{ConfigError, LoggingConfig, TracerConfig, DEFAULT_BUILTIN_PACKAGES};
use tempfile::tempdir;

#[test]
fn empty_file_yields_defaults() {
    let config = TracerConfig::load_from_str("").unwrap();
    assert_eq!(config, TracerConfig::default());
    assert_eq!(config.java, PathBuf::from("java"));
    assert_eq!(config.connect_attempts, 50);
    assert_eq!(config.connect_retry_interval().as_millis(), 100);
    assert_eq!(config.builtin_packages.len(), DEFAULT_BUILTIN_PACKAGES.len());
    assert_eq!(config.logging, LoggingConfig::default());
    assert_eq!(config.logging.level, "warn");
}

#[test]
fn load_from_path_reads_every_section() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("jtrace.toml");
    std::fs::write(
        &path,
        r#"
java = "/opt/jdk/bin/java"
connect_attempts = 3
builtin_packages = ["java.", "com.example.vendored."]

[logging]
level = "debug"
json = true
"#,
    )
    .unwrap();

    let config = TracerConfig::load_from_path(&path).unwrap();
    assert_eq!(config.java, PathBuf::from("/opt/jdk/bin/java"));
    assert_eq!(config.javac, PathBuf::from("javac"));
    assert_eq!(config.connect_attempts, 3);
    assert!(config.is_builtin_type("com.example.vendored.Thing"));
    assert!(!config.is_builtin_type("javax.swing.JFrame"));
    assert_eq!(config.logging.level, "debug");
    assert!(config.logging.json);
}

#[test]
fn unknown_keys_are_rejected() {
    let err = TracerConfig::load_from_str("jvm = \"java\"\n").unwrap_err();
    assert!(matches!(err, ConfigError::Toml(_)), "{err:?}");

    let err = TracerConfig::load_from_str("[logging]\ncolor = true\n").unwrap_err();
    assert!(err.to_string().contains("unknown field"), "{err}");
}

#[test]
fn missing_file_reports_the_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    let err = TracerConfig::load_from_path(&path).unwrap_err();
    let ConfigError::Io { path: reported, .. } = &err else {
        panic!("expected io error, got {err:?}");
    };
    assert!(reported.ends_with("absent.toml"));
}

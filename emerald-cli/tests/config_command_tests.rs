//! Integration tests for `emerald config`.

use std::fs;

use clap::Parser;
use tempfile::TempDir;

use emerald_cli::cli::Cli;
use emerald_cli::commands::config::validation_report;
use emerald_cli::error::CliError;

const VALID: &str = r#"
[general]
log_level = "info"
log_format = "json"

[[ingest.servers]]
id = "eu-1"
log_path = "/srv/eu-1/Deadside.log"
"#;

fn write_config(dir: &TempDir, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join("emerald.toml");
    fs::write(&path, contents).expect("should write config");
    path
}

#[tokio::test]
async fn validate_reports_valid_config() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, VALID);

    let report = validation_report(&path).await;
    assert!(report.valid);
    assert_eq!(report.servers, 1);
    assert!(report.errors.is_empty());
}

#[tokio::test]
async fn validate_reports_field_of_invalid_value() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[ingest]\nmax_read_bytes = 10\nmax_line_length = 100\n");

    let report = validation_report(&path).await;
    assert!(!report.valid);
    assert!(report.errors[0].contains("ingest."), "got: {:?}", report.errors);
}

#[tokio::test]
async fn validate_command_fails_with_config_exit_code() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[general\nlog_level = \"info\"\n");

    let cli = Cli::try_parse_from([
        "emerald",
        "--output",
        "json",
        "-c",
        path.to_str().unwrap(),
        "config",
        "validate",
    ])
    .unwrap();
    let err = emerald_cli::run(cli).await.unwrap_err();
    assert!(matches!(err, CliError::Config(_)));
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn show_missing_file_is_core_error() {
    let cli = Cli::try_parse_from([
        "emerald",
        "-c",
        "/nonexistent/emerald.toml",
        "config",
        "show",
    ])
    .unwrap();
    let err = emerald_cli::run(cli).await.unwrap_err();
    assert!(matches!(err, CliError::Core(_)));
}

#[tokio::test]
async fn show_section_succeeds() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, VALID);

    let cli = Cli::try_parse_from([
        "emerald",
        "-c",
        path.to_str().unwrap(),
        "config",
        "show",
        "--section",
        "metrics",
    ])
    .unwrap();
    emerald_cli::run(cli).await.expect("show should succeed");
}

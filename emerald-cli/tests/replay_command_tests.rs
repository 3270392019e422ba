//! Integration tests for `emerald replay` and `emerald cursors`.

use std::fs;

use clap::Parser;
use tempfile::TempDir;

use emerald_cli::cli::Cli;
use emerald_cli::error::CliError;

const QUEUE_A: &str = "LogNet: Join request: /Game/Maps/World_0?Name=A&eosid=|00aa";
const JOIN_A: &str = "LogOnline: Player |00aa successfully registered!";
const QUEUE_B: &str = "LogNet: Join request: /Game/Maps/World_0?Name=B&eosid=|00bb";
const LEAVE_B: &str = "LogNet: UChannel::Close: Sending CloseBunch. UniqueId: EOS:|00bb";
const JOIN_C: &str = "LogOnline: Player |00cc successfully registered!";
const LEAVE_C: &str = "LogNet: UChannel::Close: Sending CloseBunch. UniqueId: EOS:|00cc";

fn cli(args: &[&str]) -> Cli {
    let mut argv = vec!["emerald", "--output", "json"];
    argv.extend_from_slice(args);
    Cli::try_parse_from(argv).expect("should parse")
}

#[tokio::test]
async fn replay_of_well_formed_log_succeeds_in_strict_mode() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("Deadside.log");
    fs::write(&log, [QUEUE_A, JOIN_A, QUEUE_B, LEAVE_B].join("\n")).unwrap();
    let missing_config = dir.path().join("none.toml");

    emerald_cli::run(cli(&[
        "-c",
        missing_config.to_str().unwrap(),
        "replay",
        log.to_str().unwrap(),
        "--strict",
    ]))
    .await
    .expect("replay should succeed");
}

#[tokio::test]
async fn strict_replay_of_join_without_queue_is_invalid() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("Deadside.log");
    fs::write(&log, format!("{JOIN_C}\n{LEAVE_C}\n")).unwrap();
    let missing_config = dir.path().join("none.toml");

    let err = emerald_cli::run(cli(&[
        "-c",
        missing_config.to_str().unwrap(),
        "replay",
        log.to_str().unwrap(),
        "--policy",
        "flag",
        "--strict",
    ]))
    .await
    .unwrap_err();
    assert!(matches!(err, CliError::ReplayInvalid(_)));
    assert_eq!(err.exit_code(), 4);
}

#[tokio::test]
async fn replay_rejects_unknown_policy() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("Deadside.log");
    fs::write(&log, "").unwrap();

    let err = emerald_cli::run(cli(&[
        "-c",
        dir.path().join("none.toml").to_str().unwrap(),
        "replay",
        log.to_str().unwrap(),
        "--policy",
        "ignore",
    ]))
    .await
    .unwrap_err();
    assert!(matches!(err, CliError::Ingest(_)));
}

#[tokio::test]
async fn replay_of_missing_log_fails() {
    let dir = TempDir::new().unwrap();
    let err = emerald_cli::run(cli(&[
        "-c",
        dir.path().join("none.toml").to_str().unwrap(),
        "replay",
        dir.path().join("missing.log").to_str().unwrap(),
    ]))
    .await
    .unwrap_err();
    assert!(err.to_string().contains("missing.log"));
}

#[tokio::test]
async fn cursors_reset_removes_entry_from_store_file() {
    let dir = TempDir::new().unwrap();
    let store = dir.path().join("cursors.json");
    fs::write(
        &store,
        r#"{ "servers": {
  "eu-1": { "server_id": "eu-1", "cursor": 10,
            "fingerprint": { "size": 10, "mtime": "2025-05-17T02:01:30Z", "file_id": null } },
  "na-2": { "server_id": "na-2", "cursor": 20,
            "fingerprint": { "size": 20, "mtime": "2025-05-17T02:01:30Z", "file_id": null } }
} }"#,
    )
    .unwrap();
    let config = dir.path().join("emerald.toml");
    fs::write(
        &config,
        format!("[ingest]\ncursor_store_path = \"{}\"\n", store.display()),
    )
    .unwrap();
    let config = config.to_str().unwrap();

    emerald_cli::run(cli(&["-c", config, "cursors", "list"]))
        .await
        .expect("list should succeed");
    emerald_cli::run(cli(&["-c", config, "cursors", "reset", "eu-1"]))
        .await
        .expect("reset should succeed");

    let remaining: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&store).unwrap()).unwrap();
    assert!(remaining["servers"].get("eu-1").is_none());
    assert_eq!(remaining["servers"]["na-2"]["cursor"], 20);
}

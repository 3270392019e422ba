//! Orchestrator integration tests.
//!
//! Full flow: config -> supervisor build -> start -> consume -> shutdown.

use std::path::Path;
use std::time::Duration;

use emerald_core::config::EmeraldConfig;
use emerald_core::types::ServerId;
use emerald_daemon::orchestrator::Orchestrator;
use tempfile::TempDir;

const QUEUE: &str = "[2025.05.17-02.01.30:123][ 42]LogNet: Join request: /Game/Maps/world_0/World_0?logintype=eos&login=Njshh&Name=Njshh&eosid=|0002e69a5b3c4d1e9f0a1b2c3d4e5f60";
const JOIN: &str = "[2025.05.17-02.01.31:007][ 43]LogOnline: Player |0002e69a5b3c4d1e9f0a1b2c3d4e5f60 successfully registered!";
const AIRDROP: &str = "[2025.05.17-02.10.00:000][900]LogSFPS: AirDrop id=drop-17 status=Flying";
const NOISE: &str = "[2025.05.17-02.13.00:000][903]LogStreaming: Display: Flushing async loaders.";

fn ingest_config(dir: &Path, pid_file: &str) -> EmeraldConfig {
    let toml_str = format!(
        r#"
[general]
log_level = "info"
pid_file = "{pid_file}"

[ingest]
poll_interval_ms = 20
cursor_store_path = "{store}"

[[ingest.servers]]
id = "eu-1"
log_path = "{log}"
"#,
        store = dir.join("cursors.json").display(),
        log = dir.join("eu-1.log").display(),
    );
    EmeraldConfig::parse(&toml_str).expect("failed to parse ingest config")
}

fn disabled_config() -> EmeraldConfig {
    EmeraldConfig::parse(
        r#"
[general]
pid_file = ""

[ingest]
enabled = false
"#,
    )
    .expect("failed to parse disabled config")
}

async fn shutdown_after(delay: Duration) -> &'static str {
    tokio::time::sleep(delay).await;
    "test"
}

#[tokio::test]
async fn disabled_ingest_reports_healthy_without_servers() {
    let orchestrator = Orchestrator::build_from_config(disabled_config())
        .await
        .expect("should build");

    let health = orchestrator.health().await;
    assert!(health.status.is_healthy());
    assert_eq!(health.ingest, "disabled");
    assert!(health.servers.is_empty());
    assert!(orchestrator.supervisor().is_none());
}

#[tokio::test]
async fn built_orchestrator_is_not_started() {
    let dir = TempDir::new().unwrap();
    let orchestrator = Orchestrator::build_from_config(ingest_config(dir.path(), ""))
        .await
        .expect("should build");

    let health = orchestrator.health().await;
    assert_eq!(health.ingest, "initialized");
    assert!(health.servers.is_empty());
    assert_eq!(
        orchestrator.supervisor().map(|s| s.server_ids()),
        Some(vec![ServerId::new("eu-1")])
    );
}

#[tokio::test]
async fn invalid_config_is_rejected_at_build() {
    let dir = TempDir::new().unwrap();
    let mut config = ingest_config(dir.path(), "");
    config.ingest.poll_interval_ms = 0;

    let result = Orchestrator::build_from_config(config).await;
    let err = result.err().expect("build should fail").to_string();
    assert!(err.contains("config validation failed"), "got: {err}");
}

#[tokio::test]
async fn run_consumes_events_and_cleans_up() {
    let dir = TempDir::new().unwrap();
    let pid_path = dir.path().join("run").join("emerald.pid");
    let log_path = dir.path().join("eu-1.log");
    std::fs::write(&log_path, format!("{QUEUE}\n{NOISE}\n{JOIN}\n{AIRDROP}\n")).unwrap();

    let config = ingest_config(dir.path(), &pid_path.display().to_string());
    let mut orchestrator = Orchestrator::build_from_config(config)
        .await
        .expect("should build");

    let consumed = orchestrator
        .run_until(shutdown_after(Duration::from_millis(500)))
        .await
        .expect("run should succeed");

    assert_eq!(consumed, 3);
    assert!(!pid_path.exists(), "PID file should be removed on shutdown");
    assert!(
        dir.path().join("cursors.json").exists(),
        "cursor should be committed"
    );

    let supervisor = orchestrator.supervisor().expect("ingest enabled");
    assert_eq!(supervisor.state_name(), "stopped");
    let snapshot = supervisor
        .snapshot(&ServerId::new("eu-1"))
        .await
        .expect("last snapshot is kept after stop");
    assert_eq!(snapshot.player_count, 1);
    assert_eq!(snapshot.queue_count, 0);
    assert_eq!(snapshot.airdrop_count, 1);
}

#[tokio::test]
async fn run_with_missing_log_file_keeps_running() {
    let dir = TempDir::new().unwrap();
    let mut orchestrator = Orchestrator::build_from_config(ingest_config(dir.path(), ""))
        .await
        .expect("should build");

    let consumed = orchestrator
        .run_until(shutdown_after(Duration::from_millis(200)))
        .await
        .expect("a missing log file is not fatal");
    assert_eq!(consumed, 0);
}

#[tokio::test]
async fn run_refuses_existing_pid_file() {
    let dir = TempDir::new().unwrap();
    let pid_path = dir.path().join("emerald.pid");
    std::fs::write(&pid_path, "4242").unwrap();

    let config = ingest_config(dir.path(), &pid_path.display().to_string());
    let mut orchestrator = Orchestrator::build_from_config(config)
        .await
        .expect("should build");

    let err = orchestrator
        .run_until(shutdown_after(Duration::from_millis(10)))
        .await
        .unwrap_err()
        .to_string();
    assert!(err.contains("4242"), "got: {err}");
    assert_eq!(std::fs::read_to_string(&pid_path).unwrap(), "4242");
}

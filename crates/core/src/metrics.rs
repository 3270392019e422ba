//! Metric names and descriptions.
//!
//! Every Prometheus metric Emerald records is named here. Modules call
//! `metrics::counter!()` / `metrics::gauge!()` / `metrics::histogram!()`
//! with these constants.
//!
//! # Naming
//!
//! - prefix: `emerald_`
//! - module: `ingest_`, `daemon_`
//! - suffix: `_total` (counter), `_seconds` (histogram), none (gauge)

// --- label keys ---

/// Server id label key
pub const LABEL_SERVER: &str = "server";

/// Event kind label key (queue, join, disconnect, airdrop, ...)
pub const LABEL_KIND: &str = "kind";

/// Classification outcome label key (event, suppressed, unclassified)
pub const LABEL_OUTCOME: &str = "outcome";

// --- ingest ---

/// Lines read and classified (counter, labels: server, outcome)
pub const INGEST_LINES_TOTAL: &str = "emerald_ingest_lines_total";

/// Events accepted and published (counter, labels: server, kind)
pub const INGEST_EVENTS_EMITTED_TOTAL: &str = "emerald_ingest_events_emitted_total";

/// World events discarded as already seen (counter, label: server)
pub const INGEST_DUPLICATES_TOTAL: &str = "emerald_ingest_duplicates_total";

/// Rotations detected (counter, label: server)
pub const INGEST_ROTATIONS_TOTAL: &str = "emerald_ingest_rotations_total";

/// Negative PC/QC observations (counter, label: server)
pub const INGEST_INVARIANT_VIOLATIONS_TOTAL: &str = "emerald_ingest_invariant_violations_total";

/// Transient file errors (counter, label: server)
pub const INGEST_FILE_ERRORS_TOTAL: &str = "emerald_ingest_file_errors_total";

/// Cursor persistence failures (counter, label: server)
pub const INGEST_CURSOR_WRITE_FAILURES_TOTAL: &str =
    "emerald_ingest_cursor_write_failures_total";

/// Duration of one poll-and-apply cycle (histogram, seconds, label: server)
pub const INGEST_POLL_DURATION_SECONDS: &str = "emerald_ingest_poll_duration_seconds";

/// Current player count (gauge, label: server)
pub const INGEST_PLAYER_COUNT: &str = "emerald_ingest_player_count";

/// Current queue count (gauge, label: server)
pub const INGEST_QUEUE_COUNT: &str = "emerald_ingest_queue_count";

/// Committed cursor offset (gauge, label: server)
pub const INGEST_CURSOR_BYTES: &str = "emerald_ingest_cursor_bytes";

// --- daemon ---

/// Daemon uptime (gauge, seconds)
pub const DAEMON_UPTIME_SECONDS: &str = "emerald_daemon_uptime_seconds";

/// Number of configured servers (gauge)
pub const DAEMON_SERVERS_CONFIGURED: &str = "emerald_daemon_servers_configured";

/// Build info (gauge, always 1, label: version)
pub const DAEMON_BUILD_INFO: &str = "emerald_daemon_build_info";

/// Histogram buckets for poll duration (seconds)
pub const POLL_DURATION_BUCKETS: &[f64] = &[0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0];

/// Registers descriptions for every metric with the installed recorder.
///
/// Safe to call without a recorder; the calls are then no-ops.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    describe_counter!(
        INGEST_LINES_TOTAL,
        "Log lines read and classified, by outcome"
    );
    describe_counter!(
        INGEST_EVENTS_EMITTED_TOTAL,
        "Events accepted and published to the sink, by kind"
    );
    describe_counter!(
        INGEST_DUPLICATES_TOTAL,
        "World events discarded because their identity was already emitted"
    );
    describe_counter!(INGEST_ROTATIONS_TOTAL, "Log file rotations detected");
    describe_counter!(
        INGEST_INVARIANT_VIOLATIONS_TOTAL,
        "Observations of negative player or queue counts"
    );
    describe_counter!(
        INGEST_FILE_ERRORS_TOTAL,
        "Transient errors opening or reading a server log"
    );
    describe_counter!(
        INGEST_CURSOR_WRITE_FAILURES_TOTAL,
        "Failed attempts to persist a server cursor"
    );
    describe_histogram!(
        INGEST_POLL_DURATION_SECONDS,
        "Duration of one poll-and-apply cycle in seconds"
    );
    describe_gauge!(INGEST_PLAYER_COUNT, "Current player count (PC)");
    describe_gauge!(INGEST_QUEUE_COUNT, "Current queue count (QC)");
    describe_gauge!(INGEST_CURSOR_BYTES, "Committed byte offset in the current log");

    describe_gauge!(DAEMON_UPTIME_SECONDS, "Emerald daemon uptime in seconds");
    describe_gauge!(DAEMON_SERVERS_CONFIGURED, "Number of configured servers");
    describe_gauge!(DAEMON_BUILD_INFO, "Build information");
}

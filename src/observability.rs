use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "callboard_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "callboard_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "callboard_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "callboard_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "callboard_connections_rejected_total";

/// Gauge: number of active conferences (loaded engines).
pub const CONFERENCES_ACTIVE: &str = "callboard_conferences_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "callboard_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "callboard_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertRoom { .. } => "insert_room",
        Command::UpdateRoom { .. } => "update_room",
        Command::DeleteRoom { .. } => "delete_room",
        Command::InsertTalk { .. } => "insert_talk",
        Command::UpdateTalk { .. } => "update_talk",
        Command::UpdateTalkStatus { .. } => "update_talk_status",
        Command::DeleteTalk { .. } => "delete_talk",
        Command::InsertBooking { .. } => "insert_booking",
        Command::BatchInsertBookings { .. } => "batch_insert_bookings",
        Command::UpdateBooking { .. } => "update_booking",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::SelectRooms => "select_rooms",
        Command::SelectTalks { .. } => "select_talks",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectFreeSlots { .. } => "select_free_slots",
        Command::SelectSlotGrid { .. } => "select_slot_grid",
        Command::SelectAvailableRooms { .. } => "select_available_rooms",
        Command::SelectConflicts { .. } => "select_conflicts",
    }
}

use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "leavedesk_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "leavedesk_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "leavedesk_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "leavedesk_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "leavedesk_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "leavedesk_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "leavedesk_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "leavedesk_wal_flush_batch_size";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: leave creation outcomes. Labels: outcome ("filed" or a rejection code).
pub const LEAVE_DECISIONS_TOTAL: &str = "leavedesk_leave_decisions_total";

/// Counter: room bookings refused for overlapping an existing one.
pub const ROOM_CONFLICTS_TOTAL: &str = "leavedesk_room_conflicts_total";

/// Histogram: dates generated per recurring booking.
pub const RECURRENCE_DATES: &str = "leavedesk_recurrence_dates";

/// Counter: notifications handed to the dispatcher. Labels: kind.
pub const NOTIFICATIONS_PUBLISHED_TOTAL: &str = "leavedesk_notifications_published_total";

/// Counter: notification delivery attempts that finished. Labels: kind, outcome.
pub const NOTIFICATIONS_DELIVERED_TOTAL: &str = "leavedesk_notifications_delivered_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertRoom { .. } => "insert_room",
        Command::DeleteRoom { .. } => "delete_room",
        Command::InsertPeriod { .. } => "insert_period",
        Command::InsertEmployee { .. } => "insert_employee",
        Command::InsertConstraint { .. } => "insert_constraint",
        Command::DeleteConstraint { .. } => "delete_constraint",
        Command::InsertBlockedRange { .. } => "insert_blocked_range",
        Command::DeleteBlockedRange { .. } => "delete_blocked_range",
        Command::InsertOverride { .. } => "insert_override",
        Command::DeleteOverride { .. } => "delete_override",
        Command::InsertLeaveRequest { .. } => "insert_leave_request",
        Command::ReviewLeaveRequest { .. } => "review_leave_request",
        Command::DeleteLeaveRequest { .. } => "delete_leave_request",
        Command::InsertRoomBooking { .. } => "insert_room_booking",
        Command::InsertRecurringBooking { .. } => "insert_recurring_booking",
        Command::UpdateRoomBooking { .. } => "update_room_booking",
        Command::DeleteRoomBooking { .. } => "delete_room_booking",
        Command::DeleteRecurringBooking { .. } => "delete_recurring_booking",
        Command::DeleteAny { .. } => "delete_any",
        Command::SelectLeaveRequests { .. } => "select_leave_requests",
        Command::SelectRoomBookings { .. } => "select_room_bookings",
        Command::SelectSeriesBookings { .. } => "select_series_bookings",
        Command::SelectConflicts { .. } => "select_conflicts",
        Command::SelectQuota { .. } => "select_quota",
        Command::SelectRecurringBookings => "select_recurring_bookings",
        Command::SelectConstraints => "select_constraints",
        Command::SelectRooms => "select_rooms",
        Command::SelectPeriods => "select_periods",
        Command::SelectEmployees => "select_employees",
        Command::SelectOverrides => "select_overrides",
        Command::SelectBlockedRanges => "select_blocked_ranges",
    }
}

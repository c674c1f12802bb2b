use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "apptd_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "apptd_query_duration_seconds";

// ── Domain counters ─────────────────────────────────────────────

/// Counter: bookings created. Labels: status (pending / confirmed).
pub const BOOKINGS_CREATED_TOTAL: &str = "apptd_bookings_created_total";

/// Counter: booking attempts rejected because the slot was taken.
pub const SLOT_CONFLICTS_TOTAL: &str = "apptd_slot_conflicts_total";

/// Counter: payments recorded. Labels: method.
pub const PAYMENTS_RECORDED_TOTAL: &str = "apptd_payments_recorded_total";

/// Counter: payroll settlements recorded.
pub const SETTLEMENTS_RECORDED_TOTAL: &str = "apptd_settlements_recorded_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "apptd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "apptd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "apptd_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "apptd_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "apptd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "apptd_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "apptd_wal_compactions_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
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
        Command::UpsertProfessional(_) => "upsert_professional",
        Command::UpsertService(_) => "upsert_service",
        Command::UpsertWorker(_) => "upsert_worker",
        Command::InsertSale { .. } => "insert_sale",
        Command::InsertBooking(_) => "insert_booking",
        Command::TransitionBooking { .. } => "transition_booking",
        Command::CancelBooking { .. } => "cancel_booking",
        Command::InsertPayment(_) => "insert_payment",
        Command::TransitionPayment { .. } => "transition_payment",
        Command::MarkPaid { .. } => "mark_paid",
        Command::SelectProfessionals => "select_professionals",
        Command::SelectServices => "select_services",
        Command::SelectWorkers => "select_workers",
        Command::SelectSales => "select_sales",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectPayments { .. } => "select_payments",
        Command::SelectSettlements { .. } => "select_settlements",
        Command::SelectSlots { .. } => "select_slots",
        Command::SelectDepositQuote { .. } => "select_deposit_quote",
        Command::SelectDailyStats { .. } => "select_daily_stats",
        Command::SelectPeriodStats { .. } => "select_period_stats",
        Command::SelectPayroll { .. } => "select_payroll",
        Command::SelectPayrollSummary { .. } => "select_payroll_summary",
        Command::SelectFinancialStats { .. } => "select_financial_stats",
    }
}

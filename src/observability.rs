use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::engine::EngineError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: engine operations executed. Labels: op, outcome.
pub const OPERATIONS_TOTAL: &str = "fleetbook_operations_total";

/// Histogram: operation latency in seconds. Labels: op.
pub const OPERATION_DURATION_SECONDS: &str = "fleetbook_operation_duration_seconds";

/// Counter: bookings rejected because the window overlapped a confirmed reservation.
pub const CONFLICTS_REJECTED_TOTAL: &str = "fleetbook_conflicts_rejected_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: vehicles held in the store, archived included.
pub const VEHICLES_TRACKED: &str = "fleetbook_vehicles_tracked";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "fleetbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "fleetbook_wal_flush_batch_size";

/// Counter: WAL compactions. Labels: outcome.
pub const WAL_COMPACTIONS_TOTAL: &str = "fleetbook_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Record the outcome and latency of one engine operation.
pub(crate) fn record_operation<T>(
    op: &'static str,
    started: Instant,
    result: &Result<T, EngineError>,
) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    metrics::counter!(OPERATIONS_TOTAL, "op" => op, "outcome" => outcome).increment(1);
    metrics::histogram!(OPERATION_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());
}

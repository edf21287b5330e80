use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::engine::EngineError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: booking operations. Labels: op, outcome.
pub const OPERATIONS_TOTAL: &str = "carbook_operations_total";

/// Histogram: booking operation latency in seconds, lock wait included. Labels: op.
pub const OPERATION_DURATION_SECONDS: &str = "carbook_operation_duration_seconds";

/// Counter: attempts the booking desk repeated after a `Busy` answer. Labels: op.
pub const RETRIES_TOTAL: &str = "carbook_retries_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: registered cars.
pub const CARS_ACTIVE: &str = "carbook_cars_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "carbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "carbook_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const COMPACTIONS_TOTAL: &str = "carbook_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// "ok", or the error's metric label.
pub fn outcome_label<T>(result: &Result<T, EngineError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => e.label(),
    }
}

pub fn record_operation<T>(op: &'static str, started: Instant, result: &Result<T, EngineError>) {
    metrics::counter!(OPERATIONS_TOTAL, "op" => op, "outcome" => outcome_label(result)).increment(1);
    metrics::histogram!(OPERATION_DURATION_SECONDS, "op" => op).record(started.elapsed().as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_labels() {
        assert_eq!(outcome_label::<()>(&Ok(())), "ok");
        assert_eq!(outcome_label::<()>(&Err(EngineError::Busy(3))), "busy");
        assert_eq!(
            outcome_label::<()>(&Err(EngineError::InvalidRange { start: 5, end: 1 })),
            "invalid_range"
        );
    }

    #[test]
    fn init_without_port_is_noop() {
        assert!(init(None).is_ok());
    }
}

use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: bookings created. Labels: source, status.
pub const BOOKINGS_CREATED_TOTAL: &str = "innkeep_bookings_created_total";

/// Counter: bookings confirmed (payment completed or house account).
pub const BOOKINGS_CONFIRMED_TOTAL: &str = "innkeep_bookings_confirmed_total";

/// Counter: bookings cancelled. Labels: reason.
pub const BOOKINGS_CANCELLED_TOTAL: &str = "innkeep_bookings_cancelled_total";

/// Counter: availability conflicts rejected (second writer lost the room).
pub const BOOKING_CONFLICTS_TOTAL: &str = "innkeep_booking_conflicts_total";

/// Counter: ledger entries recorded. Labels: source.
pub const PAYMENTS_RECORDED_TOTAL: &str = "innkeep_payments_recorded_total";

/// Counter: refunds issued.
pub const REFUNDS_ISSUED_TOTAL: &str = "innkeep_refunds_issued_total";

/// Counter: best-effort collaborator calls that failed or timed out.
pub const SIDE_EFFECT_FAILURES_TOTAL: &str = "innkeep_side_effect_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: bookings currently blocking rooms (confirmed + checked-in).
pub const ACTIVE_BOOKINGS: &str = "innkeep_active_bookings";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "innkeep_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (frames per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "innkeep_wal_flush_batch_size";

/// Install the fmt tracing subscriber, honoring `RUST_LOG`. Embedders that
/// bring their own subscriber skip this.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

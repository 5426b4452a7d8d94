//! Prometheus metrics

use crate::domain::session::{Protocol, Side};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;

/// Initialize the Prometheus metrics exporter and serve it on `listen`
pub fn init_metrics(listen: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(listen)
        .install()?;

    // Describe metrics
    describe_gauge!(
        "fonbox_sessions_active",
        "Number of sessions currently held by the relay"
    );
    describe_counter!(
        "fonbox_sessions_total",
        "Total number of sessions connected"
    );
    describe_counter!(
        "fonbox_messages_relayed_total",
        "Total number of messages rewritten and forwarded"
    );
    describe_counter!(
        "fonbox_messages_rejected_total",
        "Total number of messages or datagrams refused"
    );

    Ok(())
}

/// Update active sessions gauge
pub fn update_active_sessions(count: usize) {
    gauge!("fonbox_sessions_active").set(count as f64);
}

/// Record a session whose leg pair is established
pub fn record_session_connected(protocol: Protocol) {
    counter!("fonbox_sessions_total", "protocol" => protocol.as_str()).increment(1);
}

/// Record a forwarded message
pub fn record_message_relayed(from: Side, protocol: Protocol) {
    let direction = match from {
        Side::Fon => "fon_to_box",
        Side::Box => "box_to_fon",
    };
    counter!(
        "fonbox_messages_relayed_total",
        "direction" => direction,
        "protocol" => protocol.as_str()
    )
    .increment(1);
}

/// Record a refused message
pub fn record_message_rejected(reason: &'static str) {
    counter!("fonbox_messages_rejected_total", "reason" => reason).increment(1);
}

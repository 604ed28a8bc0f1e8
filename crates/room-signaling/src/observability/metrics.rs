//! Metrics definitions for room signaling.
//!
//! All metrics follow Prometheus naming conventions:
//! - `room_` prefix
//! - `_total` suffix for counters
//!
//! The embedding application installs the recorder; without one every
//! call here is a no-op.

use metrics::{counter, gauge};

/// Record the handling of an inbound snapshot.
///
/// Metric: `room_snapshots_total`
/// Labels: `outcome` (applied, invalid)
pub fn record_snapshot(outcome: &str) {
    counter!("room_snapshots_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record a message received on a side-channel.
///
/// Metric: `room_channel_messages_total`
/// Labels: `channel`
///
/// Cardinality: 7 (bounded by `ChannelName`)
pub fn record_channel_message(channel: &str) {
    counter!("room_channel_messages_total", "channel" => channel.to_string()).increment(1);
}

/// Record a network quality resend after the response timeout.
///
/// Metric: `room_network_quality_resends_total`
pub fn record_network_quality_resend() {
    counter!("room_network_quality_resends_total").increment(1);
}

/// Record a terminal subscription failure.
///
/// Metric: `room_subscription_failures_total`
pub fn record_subscription_failure() {
    counter!("room_subscription_failures_total").increment(1);
}

/// Record a track listed both as switched off and switched on in one message.
///
/// Metric: `room_switch_off_conflicts_total`
pub fn record_switch_off_conflict() {
    counter!("room_switch_off_conflicts_total").increment(1);
}

/// Set the number of connected remote participants.
///
/// Metric: `room_participants_active`
pub fn set_participants_active(count: usize) {
    // usize to f64 conversion is safe for realistic room sizes (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("room_participants_active").set(count as f64);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    #[test]
    fn test_metrics_are_recorded_with_bounded_labels() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_snapshot("applied");
            record_snapshot("applied");
            record_snapshot("invalid");
            record_channel_message("render_hints");
            record_network_quality_resend();
            record_subscription_failure();
            record_switch_off_conflict();
            set_participants_active(3);
        });

        let metrics = snapshotter.snapshot().into_vec();

        let applied = metrics
            .iter()
            .find(|(key, _, _, _)| {
                key.key().name() == "room_snapshots_total"
                    && key
                        .key()
                        .labels()
                        .any(|l| l.key() == "outcome" && l.value() == "applied")
            })
            .map(|(_, _, _, value)| value)
            .expect("applied snapshot counter");
        assert_eq!(*applied, DebugValue::Counter(2));

        let participants = metrics
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "room_participants_active")
            .map(|(_, _, _, value)| value)
            .expect("participants gauge");
        assert!(
            matches!(*participants, DebugValue::Gauge(v) if (v.into_inner() - 3.0).abs() < f64::EPSILON)
        );

        for name in [
            "room_channel_messages_total",
            "room_network_quality_resends_total",
            "room_subscription_failures_total",
            "room_switch_off_conflicts_total",
        ] {
            assert!(
                metrics.iter().any(|(key, _, _, _)| key.key().name() == name),
                "missing metric {name}"
            );
        }
    }
}

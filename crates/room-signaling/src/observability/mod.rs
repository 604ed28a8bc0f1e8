//! Observability for room signaling.
//!
//! # Privacy by Default
//!
//! The actor loop uses `#[instrument(skip_all)]` with explicit field
//! allow-listing. Participant identities and track names are never logged;
//! sids are. Metric labels are bounded:
//! - `outcome`: applied, invalid
//! - `channel`: the seven side-channel names
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `room_snapshots_total` | Counter | `outcome` | Inbound snapshot handling |
//! | `room_channel_messages_total` | Counter | `channel` | Side-channel messages received |
//! | `room_network_quality_resends_total` | Counter | none | Resend timer expiries |
//! | `room_subscription_failures_total` | Counter | none | Terminal subscription failures |
//! | `room_switch_off_conflicts_total` | Counter | none | Sid listed both off and on |
//! | `room_participants_active` | Gauge | none | Connected remote participants |

pub mod metrics;

use common::config::ObservabilityConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Calling this
/// twice is harmless; the second install is ignored.
pub fn init_tracing(config: &ObservabilityConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    if let Err(e) = result {
        tracing::debug!(target: "room.actor", error = %e, "Tracing subscriber already installed");
    }
}

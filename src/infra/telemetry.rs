use std::sync::Once;

use metrics::{Unit, describe_counter};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::{
    METRIC_BLOCK_BYPASS, METRIC_BLOCK_HIT, METRIC_BLOCK_MISS, METRIC_GENERATION_ROTATE,
    METRIC_PROTOCOL_MISUSE, METRIC_STORE_ERROR,
};
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register descriptions for every block cache metric.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_BLOCK_HIT,
            Unit::Count,
            "Blocks replayed from the store."
        );
        describe_counter!(
            METRIC_BLOCK_MISS,
            Unit::Count,
            "Blocks rendered because the store had no entry."
        );
        describe_counter!(
            METRIC_BLOCK_BYPASS,
            Unit::Count,
            "Blocks rendered without the store because a policy or config disabled caching."
        );
        describe_counter!(
            METRIC_STORE_ERROR,
            Unit::Count,
            "Store operations that failed and were treated as a miss or a no-op."
        );
        describe_counter!(
            METRIC_PROTOCOL_MISUSE,
            Unit::Count,
            "Block end calls without a matching begin."
        );
        describe_counter!(
            METRIC_GENERATION_ROTATE,
            Unit::Count,
            "Generation stamp rotations (cache flushes)."
        );
    });
}

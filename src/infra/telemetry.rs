use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::metrics::{
    METRIC_HANDLER_MS, METRIC_INVALIDATION, METRIC_OBJECT_HIT, METRIC_OBJECT_MISS,
    METRIC_RESPONSE_BYPASS, METRIC_RESPONSE_HIT, METRIC_RESPONSE_MISS, METRIC_STORE_EVICT,
    METRIC_STORE_UNAVAILABLE, METRIC_STORE_WRITE_DROPPED,
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
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
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

/// Register descriptions for every cache metric with the installed recorder.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_RESPONSE_HIT,
            Unit::Count,
            "Total number of responses served from the cache."
        );
        describe_counter!(
            METRIC_RESPONSE_MISS,
            Unit::Count,
            "Total number of cacheable requests that ran their handler."
        );
        describe_counter!(
            METRIC_RESPONSE_BYPASS,
            Unit::Count,
            "Total number of requests that skipped the cache entirely."
        );
        describe_counter!(
            METRIC_OBJECT_HIT,
            Unit::Count,
            "Total number of object-cache hits."
        );
        describe_counter!(
            METRIC_OBJECT_MISS,
            Unit::Count,
            "Total number of object-cache misses."
        );
        describe_counter!(
            METRIC_STORE_UNAVAILABLE,
            Unit::Count,
            "Total number of store operations that found the backend unavailable."
        );
        describe_counter!(
            METRIC_STORE_WRITE_DROPPED,
            Unit::Count,
            "Total number of cache writes abandoned after their last attempt."
        );
        describe_counter!(
            METRIC_STORE_EVICT,
            Unit::Count,
            "Total number of in-process entries evicted due to capacity."
        );
        describe_counter!(
            METRIC_INVALIDATION,
            Unit::Count,
            "Total number of invalidations, labelled by outcome."
        );
        describe_histogram!(
            METRIC_HANDLER_MS,
            Unit::Milliseconds,
            "Latency of handlers run on a cache miss, in milliseconds."
        );
    });
}

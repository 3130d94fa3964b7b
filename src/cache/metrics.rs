//! Metric names emitted by the cache. Descriptions are registered in
//! [`crate::infra::telemetry`].

pub const METRIC_RESPONSE_HIT: &str = "pagecache_response_hit_total";
pub const METRIC_RESPONSE_MISS: &str = "pagecache_response_miss_total";
pub const METRIC_RESPONSE_BYPASS: &str = "pagecache_response_bypass_total";
pub const METRIC_OBJECT_HIT: &str = "pagecache_object_hit_total";
pub const METRIC_OBJECT_MISS: &str = "pagecache_object_miss_total";
pub const METRIC_STORE_UNAVAILABLE: &str = "pagecache_store_unavailable_total";
pub const METRIC_STORE_WRITE_DROPPED: &str = "pagecache_store_write_dropped_total";
pub const METRIC_STORE_EVICT: &str = "pagecache_store_evict_total";
pub const METRIC_INVALIDATION: &str = "pagecache_invalidation_total";
pub const METRIC_HANDLER_MS: &str = "pagecache_handler_ms";

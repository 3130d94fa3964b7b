//! Which requests and responses may go through the cache.

use axum::{
    body::Body,
    http::{HeaderMap, Method, Request, StatusCode, header},
    response::Response,
};

use super::config::CacheConfig;

/// Decides cacheability. A request rejected here bypasses the cache
/// entirely: no lookup and no write.
pub trait CachePolicy: Send + Sync {
    fn is_request_cacheable(&self, request: &Request<Body>) -> bool;

    fn is_response_cacheable(&self, response: &Response) -> bool;
}

/// Caches anonymous requests with a configured method, and plain public
/// responses with a configured status.
#[derive(Debug, Clone)]
pub struct DefaultCachePolicy {
    methods: Vec<Method>,
    statuses: Vec<StatusCode>,
    max_body_bytes: usize,
}

impl DefaultCachePolicy {
    pub fn new(methods: Vec<Method>, statuses: Vec<StatusCode>, max_body_bytes: usize) -> Self {
        Self {
            methods,
            statuses,
            max_body_bytes,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(
            config.cacheable_methods.clone(),
            config.cacheable_statuses.clone(),
            config.max_body_bytes,
        )
    }
}

impl Default for DefaultCachePolicy {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

impl CachePolicy for DefaultCachePolicy {
    fn is_request_cacheable(&self, request: &Request<Body>) -> bool {
        self.methods.contains(request.method())
            && !request.headers().contains_key(header::AUTHORIZATION)
    }

    fn is_response_cacheable(&self, response: &Response) -> bool {
        let headers = response.headers();

        self.statuses.contains(&response.status())
            && !headers.contains_key(header::SET_COOKIE)
            && !forbids_shared_caching(headers)
            && !is_event_stream(headers)
            && declared_length(headers).is_none_or(|len| len <= self.max_body_bytes)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn forbids_shared_caching(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::CACHE_CONTROL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|directive| directive.trim().to_ascii_lowercase())
        .any(|directive| {
            directive == "private" || directive == "no-store" || directive == "no-cache"
        })
}

fn is_event_stream(headers: &HeaderMap) -> bool {
    header_str(headers, header::CONTENT_TYPE).is_some_and(|value| value.starts_with("text/event-stream"))
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    header_str(headers, header::CONTENT_LENGTH).and_then(|value| value.trim().parse().ok())
}

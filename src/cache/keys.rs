//! Cache key derivation.
//!
//! Keys have the shape `{prefix}:{version}:{route}[#{variation}]`:
//!
//! - `route` is the request path for `GET`, or `"{METHOD} {path}"` for any
//!   other cacheable method. A space never occurs in a request path.
//! - `variation` is the hex SHA-256 of the ordered variation inputs (sorted
//!   query parameters, then the configured headers). A `#` never occurs in a
//!   request path either, so a varied key cannot collide with a plain one.

use std::fmt;

use axum::{
    body::Body,
    http::{HeaderName, Method, Request},
};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::config::{CacheConfig, Namespace};

/// Longest key accepted by the builder, matching the common memcached limit.
pub const MAX_KEY_LEN: usize = 250;

/// Marks the start of the hashed variation part of a key.
pub const VARIATION_MARKER: char = '#';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("header `{header}` carries a value that is not visible ASCII")]
    InvalidHeaderValue { header: String },
    #[error("derived key is {len} bytes, limit is {MAX_KEY_LEN}")]
    TooLong { len: usize },
}

/// Opaque, namespaced cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Prefix shared by every variation of this key.
    pub(crate) fn variations_prefix(&self) -> String {
        format!("{}{VARIATION_MARKER}", self.0)
    }

    fn checked(key: String) -> Result<Self, KeyError> {
        if key.len() > MAX_KEY_LEN {
            return Err(KeyError::TooLong { len: key.len() });
        }
        Ok(Self(key))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Method plus normalized path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteIdentity {
    method: Method,
    path: String,
}

impl RouteIdentity {
    pub fn new(method: Method, path: &str) -> Self {
        let path = if path.is_empty() {
            "/".to_string()
        } else if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        Self { method, path }
    }

    /// Route identity of a `GET` on `path`.
    pub fn get(path: &str) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn from_request(request: &Request<Body>) -> Self {
        Self::new(request.method().clone(), request.uri().path())
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn render(&self) -> String {
        if self.method == Method::GET {
            self.path.clone()
        } else {
            format!("{} {}", self.method, self.path)
        }
    }
}

/// Ordered (name, value) pairs that split one route into several entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariationInputs {
    pairs: Vec<(String, String)>,
}

impl VariationInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((name.into(), value.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Collect the inputs the configuration says a request varies on.
    pub fn from_request(request: &Request<Body>, config: &CacheConfig) -> Result<Self, KeyError> {
        let mut inputs = Self::new();

        if config.vary_on_query
            && let Some(query) = request.uri().query()
        {
            let mut params: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect();
            params.sort();
            for (name, value) in params {
                inputs.push(format!("query:{name}"), value);
            }
        }

        for header in &config.vary_headers {
            let value = header_value(request, header)?;
            inputs.push(format!("header:{}", header.as_str()), value);
        }

        Ok(inputs)
    }

    fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for (name, value) in &self.pairs {
            hasher.update(name.len().to_be_bytes());
            hasher.update(name.as_bytes());
            hasher.update(value.len().to_be_bytes());
            hasher.update(value.as_bytes());
        }
        hex::encode(hasher.finalize().to_vec())
    }
}

fn header_value(request: &Request<Body>, header: &HeaderName) -> Result<String, KeyError> {
    let mut values = Vec::new();
    for value in request.headers().get_all(header) {
        let text = value.to_str().map_err(|_| KeyError::InvalidHeaderValue {
            header: header.as_str().to_string(),
        })?;
        values.push(text.trim());
    }
    Ok(values.join(","))
}

/// Derive the key for a route within a namespace. Pure.
pub fn build_key(
    route: &RouteIdentity,
    variation: &VariationInputs,
    namespace: &Namespace,
) -> Result<CacheKey, KeyError> {
    let mut key = namespace.scope(&route.render());
    if !variation.is_empty() {
        key.push(VARIATION_MARKER);
        key.push_str(&variation.digest());
    }
    CacheKey::checked(key)
}

/// Derive the key of a named application object (see [`super::ObjectCache`]).
pub fn object_key(name: &str, namespace: &Namespace) -> Result<CacheKey, KeyError> {
    CacheKey::checked(namespace.scope(name))
}

/// Derive the key for an incoming request.
pub fn key_for_request(request: &Request<Body>, config: &CacheConfig) -> Result<CacheKey, KeyError> {
    let route = RouteIdentity::from_request(request);
    let variation = VariationInputs::from_request(request, config)?;
    build_key(&route, &variation, &config.namespace)
}

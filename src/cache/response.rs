//! Captured HTTP responses and their stored form.

use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::Response,
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, future, stream};
use http_body_util::BodyExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::error::CacheError;

/// Headers that describe one connection rather than the resource.
fn is_hop_by_hop(name: &HeaderName) -> bool {
    *name == header::CONNECTION
        || *name == header::TRANSFER_ENCODING
        || *name == header::UPGRADE
        || *name == header::TE
}

/// A fully buffered response, ready to be stored or replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    status: StatusCode,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Bytes,
}

#[derive(Serialize, Deserialize)]
struct StoredResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

impl CachedResponse {
    pub fn new(status: StatusCode, headers: &HeaderMap, body: Bytes) -> Self {
        let headers = headers
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        Self {
            status,
            headers,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;

        let headers = response.headers_mut();
        for (name, value) in self.headers {
            headers.append(name, value);
        }

        response
    }

    /// Serialize for the entry store. Header values must be visible ASCII.
    pub fn encode(&self) -> Result<Bytes, CacheError> {
        let mut headers = Vec::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let value = value.to_str().map_err(|_| {
                CacheError::serialization(format!("header `{name}` is not visible ASCII"))
            })?;
            headers.push((name.as_str().to_string(), value.to_string()));
        }

        let stored = StoredResponse {
            status: self.status.as_u16(),
            headers,
            body: STANDARD.encode(&self.body),
        };
        serde_json::to_vec(&stored)
            .map(Bytes::from)
            .map_err(|err| CacheError::serialization(err.to_string()))
    }

    pub fn decode(raw: &[u8]) -> Result<Self, CacheError> {
        let stored: StoredResponse =
            serde_json::from_slice(raw).map_err(|err| CacheError::serialization(err.to_string()))?;

        let status = StatusCode::from_u16(stored.status)
            .map_err(|err| CacheError::serialization(err.to_string()))?;
        let mut headers = Vec::with_capacity(stored.headers.len());
        for (name, value) in stored.headers {
            let name = HeaderName::try_from(name)
                .map_err(|err| CacheError::serialization(err.to_string()))?;
            let value = HeaderValue::try_from(value)
                .map_err(|err| CacheError::serialization(err.to_string()))?;
            headers.push((name, value));
        }
        let body = STANDARD
            .decode(stored.body)
            .map_err(|err| CacheError::serialization(err.to_string()))?;

        Ok(Self {
            status,
            headers,
            body: Bytes::from(body),
        })
    }
}

#[derive(Debug, Error)]
#[error("failed to buffer response body: {0}")]
pub struct BufferError(String);

/// A response after [`buffer_response`] read its body.
pub enum Buffered {
    /// The whole body fit under the limit.
    Captured(Response, CachedResponse),
    /// The body outgrew the limit. The response streams the bytes already
    /// read followed by the unread rest.
    Oversized(Response),
}

/// Collect at most `limit` body bytes, returning a rebuilt response
/// alongside the capture.
pub async fn buffer_response(
    response: Response,
    limit: usize,
) -> Result<Buffered, (Response, BufferError)> {
    let (parts, mut body) = response.into_parts();
    let mut captured = BytesMut::new();

    while let Some(frame) = body.frame().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(error) => {
                let rebuilt = Response::from_parts(parts, Body::empty());
                return Err((rebuilt, BufferError(error.to_string())));
            }
        };
        // Trailers are not replayed.
        let Ok(data) = frame.into_data() else {
            continue;
        };
        captured.extend_from_slice(&data);

        if captured.len() > limit {
            let head = stream::once(future::ready(Ok::<_, axum::Error>(captured.freeze())));
            let rest = Body::from_stream(head.chain(body.into_data_stream()));
            return Ok(Buffered::Oversized(Response::from_parts(parts, rest)));
        }
    }

    let bytes = captured.freeze();
    let cached = CachedResponse::new(parts.status, &parts.headers, bytes.clone());
    let rebuilt = Response::from_parts(parts, Body::from(bytes));
    Ok(Buffered::Captured(rebuilt, cached))
}

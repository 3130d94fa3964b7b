use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::application::error::HttpError;
use crate::application::recipes::invalidation_failure;
use crate::cache::InvalidationTarget;

use super::AdminState;

const SOURCE: &str = "infra::http::admin::cache";

#[derive(Debug, Deserialize)]
pub(super) struct RouteQuery {
    path: String,
}

#[derive(Debug, Serialize)]
struct InvalidationSummary {
    target: String,
    removed: u64,
}

pub(super) async fn invalidate_namespace(State(state): State<AdminState>) -> Response {
    invalidate(&state, InvalidationTarget::Namespace).await
}

pub(super) async fn invalidate_route(
    State(state): State<AdminState>,
    Query(query): Query<RouteQuery>,
) -> Response {
    if !query.path.starts_with('/') {
        return HttpError::new(
            SOURCE,
            StatusCode::BAD_REQUEST,
            "Route path must be absolute",
            format!("`{}` does not start with `/`", query.path),
        )
        .into_response();
    }
    invalidate(&state, InvalidationTarget::Route(query.path)).await
}

async fn invalidate(state: &AdminState, target: InvalidationTarget) -> Response {
    let label = target.to_string();
    match state.cache.invalidate(target).await {
        Ok(removed) => {
            info!(target = "pagecache::admin", invalidated = %label, removed, "cache invalidated");
            Json(InvalidationSummary {
                target: label,
                removed,
            })
            .into_response()
        }
        Err(err) => invalidation_failure(err).into_response(),
    }
}

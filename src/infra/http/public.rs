use std::time::Duration;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};

use crate::{
    application::recipes::RecipeService,
    cache::{ResponseCache, response_cache_layer},
    presentation::views::{RecipesTemplate, render_template_response},
};

use super::{
    middleware::{log_responses, set_request_context},
    store_health_response,
};

/// Path of the cached recipe listing.
pub const COOKBOOK_PATH: &str = "/cookbook/";

#[derive(Clone)]
pub struct HttpState {
    pub recipes: RecipeService,
    pub cache: ResponseCache,
    /// TTL of the cached listing page.
    pub page_ttl: Duration,
}

pub fn build_router(state: HttpState) -> Router {
    let page_cache = state.cache.for_route(Some(state.page_ttl));

    let cached_routes = Router::new()
        .route(COOKBOOK_PATH, get(recipes_page))
        .route_layer(middleware::from_fn_with_state(
            page_cache,
            response_cache_layer,
        ));

    let uncached_routes = Router::new().route("/_health/cache", get(public_health));

    cached_routes
        .merge(uncached_routes)
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn recipes_page(State(state): State<HttpState>) -> Response {
    match state.recipes.recipes_with_cache().await {
        Ok(recipes) => render_template_response(RecipesTemplate::new(&recipes), StatusCode::OK),
        Err(err) => err.into_response(),
    }
}

async fn public_health(State(state): State<HttpState>) -> Response {
    store_health_response(state.cache.store().ping().await)
}

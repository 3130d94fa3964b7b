mod cache;
mod health;
mod recipes;
mod state;

pub use state::AdminState;

use axum::{
    Router, middleware,
    routing::{delete, get, post},
};

use super::middleware::{log_responses, set_request_context};

pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/cookbook/recipes", post(recipes::admin_recipe_create))
        .route("/admin/cache", delete(cache::invalidate_namespace))
        .route("/admin/cache/route", delete(cache::invalidate_route))
        .route("/admin/cache/health", get(health::admin_health))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

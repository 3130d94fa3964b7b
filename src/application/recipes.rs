use std::sync::Arc;

use axum::http::StatusCode;
use tracing::info;

use crate::application::error::HttpError;
use crate::application::repos::{
    CookbookRepo, CreateIngredientParams, CreateRecipeParams, RepoError,
};
use crate::cache::{CacheError, ObjectCache};
use crate::domain::entities::{Recipe, validate_name};
use crate::domain::error::DomainError;

const SOURCE: &str = "application::recipes::RecipeService";

/// Object cache key of the full recipe listing.
pub const RECIPES_CACHE_KEY: &str = "recipes";

#[derive(Clone)]
pub struct RecipeService {
    recipes: Arc<dyn CookbookRepo>,
    objects: ObjectCache,
}

impl RecipeService {
    pub fn new(recipes: Arc<dyn CookbookRepo>, objects: ObjectCache) -> Self {
        Self { recipes, objects }
    }

    pub async fn recipes_without_cache(&self) -> Result<Vec<Recipe>, HttpError> {
        self.recipes
            .list_recipes()
            .await
            .map_err(|err| repo_failure("list_recipes", err))
    }

    /// The recipe listing, read through the object cache under
    /// [`RECIPES_CACHE_KEY`] with the configured default TTL.
    pub async fn recipes_with_cache(&self) -> Result<Vec<Recipe>, HttpError> {
        self.objects
            .get_or_insert_with(RECIPES_CACHE_KEY, None, || self.recipes.list_recipes())
            .await
            .map_err(|err| repo_failure("list_recipes", err))
    }

    /// Persist a recipe and drop the cached listing.
    pub async fn create_recipe(&self, params: CreateRecipeParams) -> Result<Recipe, HttpError> {
        let params = validate(params).map_err(|err| {
            HttpError::from_error(SOURCE, StatusCode::BAD_REQUEST, "Invalid recipe", &err)
        })?;

        let recipe = self
            .recipes
            .create_recipe(params)
            .await
            .map_err(|err| repo_failure("create_recipe", err))?;
        info!(target = "pagecache::recipes", recipe = %recipe, id = %recipe.id, "recipe created");

        self.objects
            .invalidate(RECIPES_CACHE_KEY)
            .await
            .map_err(invalidation_failure)?;
        Ok(recipe)
    }
}

fn validate(params: CreateRecipeParams) -> Result<CreateRecipeParams, DomainError> {
    let ingredients = params
        .ingredients
        .into_iter()
        .map(|ingredient| {
            Ok(CreateIngredientParams {
                food: validate_name("ingredient food", &ingredient.food)?,
                amount: ingredient.amount,
                unit_of_measure: validate_name("unit of measure", &ingredient.unit_of_measure)?,
                desc: ingredient.desc.trim().to_string(),
            })
        })
        .collect::<Result<Vec<_>, DomainError>>()?;

    Ok(CreateRecipeParams {
        name: validate_name("recipe name", &params.name)?,
        desc: non_blank(params.desc),
        instructions: non_blank(params.instructions),
        ingredients,
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn repo_failure(operation: &'static str, err: RepoError) -> HttpError {
    match err {
        RepoError::InvalidInput { message } => HttpError::new(
            SOURCE,
            StatusCode::BAD_REQUEST,
            "Invalid recipe",
            format!("{operation} rejected input: {message}"),
        ),
        other => HttpError::new(
            SOURCE,
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to load recipes",
            format!("{operation} failed: {other}"),
        ),
    }
}

pub(crate) fn invalidation_failure(err: CacheError) -> HttpError {
    HttpError::from_error(
        SOURCE,
        StatusCode::SERVICE_UNAVAILABLE,
        "Cache invalidation could not be confirmed",
        &err,
    )
}

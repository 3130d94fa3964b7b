use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::application::error::HttpError;
use crate::application::recipes::invalidation_failure;
use crate::application::repos::{CreateIngredientParams, CreateRecipeParams};
use crate::cache::InvalidationTarget;
use crate::domain::entities::Amount;
use crate::domain::error::DomainError;

use super::super::COOKBOOK_PATH;
use super::AdminState;

const SOURCE: &str = "infra::http::admin::recipes";

#[derive(Debug, Deserialize)]
pub(super) struct RecipeForm {
    name: String,
    #[serde(default)]
    desc: Option<String>,
    #[serde(default)]
    instructions: Option<String>,
    #[serde(default)]
    ingredients: Vec<IngredientForm>,
}

#[derive(Debug, Deserialize)]
struct IngredientForm {
    food: String,
    /// Decimal with up to three places, e.g. `"0.125"`.
    #[serde(default)]
    amount: Option<String>,
    unit_of_measure: String,
    #[serde(default)]
    desc: String,
}

impl RecipeForm {
    fn into_params(self) -> Result<CreateRecipeParams, DomainError> {
        let ingredients = self
            .ingredients
            .into_iter()
            .map(|ingredient| {
                let amount = match ingredient.amount.as_deref().map(str::trim) {
                    None | Some("") => None,
                    Some(raw) => Some(raw.parse::<Amount>()?),
                };
                Ok(CreateIngredientParams {
                    food: ingredient.food,
                    amount,
                    unit_of_measure: ingredient.unit_of_measure,
                    desc: ingredient.desc,
                })
            })
            .collect::<Result<Vec<_>, DomainError>>()?;

        Ok(CreateRecipeParams {
            name: self.name,
            desc: self.desc,
            instructions: self.instructions,
            ingredients,
        })
    }
}

/// Create a recipe, then retire the cached listing page.
///
/// The recipe stays created when the page invalidation fails; the 503 tells
/// the operator the page may still be stale.
pub(super) async fn admin_recipe_create(
    State(state): State<AdminState>,
    Json(form): Json<RecipeForm>,
) -> Response {
    let params = match form.into_params() {
        Ok(params) => params,
        Err(err) => {
            return HttpError::from_error(SOURCE, StatusCode::BAD_REQUEST, "Invalid recipe", &err)
                .into_response();
        }
    };

    let recipe = match state.recipes.create_recipe(params).await {
        Ok(recipe) => recipe,
        Err(err) => return err.into_response(),
    };

    if let Err(err) = state
        .cache
        .invalidate(InvalidationTarget::Route(COOKBOOK_PATH.to_string()))
        .await
    {
        return invalidation_failure(err).into_response();
    }

    (StatusCode::CREATED, Json(recipe)).into_response()
}

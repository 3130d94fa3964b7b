use crate::application::error::HttpError;
use crate::domain::entities::Recipe;
use askama::{Error as AskamaError, Template};
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{public_message}")]
pub struct TemplateRenderError {
    pub(crate) source: &'static str,
    pub(crate) public_message: &'static str,
    #[source]
    pub(crate) error: AskamaError,
}

impl TemplateRenderError {
    pub fn new(source: &'static str, public_message: &'static str, error: AskamaError) -> Self {
        Self {
            source,
            public_message,
            error,
        }
    }
}

impl From<TemplateRenderError> for HttpError {
    fn from(err: TemplateRenderError) -> Self {
        let TemplateRenderError {
            source,
            public_message,
            error,
        } = err;

        HttpError::from_error(
            source,
            StatusCode::INTERNAL_SERVER_ERROR,
            public_message,
            &error,
        )
    }
}

pub fn render_template<T: Template>(template: T) -> Result<Html<String>, HttpError> {
    template.render().map(Html).map_err(|err| {
        TemplateRenderError::new(
            "presentation::views::render_template",
            "Template rendering failed",
            err,
        )
        .into()
    })
}

pub fn render_template_response<T: Template>(template: T, status: StatusCode) -> Response {
    match render_template(template) {
        Ok(html) => (status, html).into_response(),
        Err(err) => err.into_response(),
    }
}

#[derive(Clone)]
pub struct IngredientView {
    pub label: String,
    pub note: Option<String>,
}

#[derive(Clone)]
pub struct RecipeView {
    pub anchor: String,
    pub name: String,
    pub desc: Option<String>,
    pub instructions: Option<String>,
    pub ingredients: Vec<IngredientView>,
}

impl From<&Recipe> for RecipeView {
    fn from(recipe: &Recipe) -> Self {
        let ingredients = recipe
            .ingredients
            .iter()
            .map(|ingredient| IngredientView {
                label: ingredient.measure(),
                note: (!ingredient.desc.is_empty()).then(|| ingredient.desc.clone()),
            })
            .collect();

        Self {
            anchor: format!("recipe-{}", recipe.id),
            name: recipe.name.clone(),
            desc: recipe.desc.clone(),
            instructions: recipe.instructions.clone(),
            ingredients,
        }
    }
}

#[derive(Template)]
#[template(path = "cookbook/recipes.html")]
pub struct RecipesTemplate {
    pub title: String,
    pub recipes: Vec<RecipeView>,
}

impl RecipesTemplate {
    pub fn new(recipes: &[Recipe]) -> Self {
        Self {
            title: "Recipes".to_string(),
            recipes: recipes.iter().map(RecipeView::from).collect(),
        }
    }
}

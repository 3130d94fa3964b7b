//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::entities::{Amount, Recipe};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct CreateIngredientParams {
    /// Food name; an existing food with the same name is reused.
    pub food: String,
    pub amount: Option<Amount>,
    pub unit_of_measure: String,
    pub desc: String,
}

#[derive(Debug, Clone)]
pub struct CreateRecipeParams {
    pub name: String,
    pub desc: Option<String>,
    pub instructions: Option<String>,
    pub ingredients: Vec<CreateIngredientParams>,
}

#[async_trait]
pub trait CookbookRepo: Send + Sync {
    /// Every recipe with its ingredients and their foods, ordered by name.
    async fn list_recipes(&self) -> Result<Vec<Recipe>, RepoError>;

    async fn find_recipe(&self, id: Uuid) -> Result<Option<Recipe>, RepoError>;

    async fn create_recipe(&self, params: CreateRecipeParams) -> Result<Recipe, RepoError>;
}

//! In-process cookbook repository, seeded with a few recipes.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::application::repos::{CookbookRepo, CreateRecipeParams, RepoError};
use crate::domain::entities::{Amount, Food, Ingredient, Recipe};

#[derive(Default)]
struct Tables {
    recipes: Vec<Recipe>,
    foods: Vec<Food>,
}

impl Tables {
    /// Reuse a food by case-insensitive name or register a new one.
    fn food(&mut self, name: &str) -> Food {
        if let Some(food) = self
            .foods
            .iter()
            .find(|food| food.name.eq_ignore_ascii_case(name))
        {
            return food.clone();
        }
        let food = Food {
            id: Uuid::new_v4(),
            name: name.to_string(),
        };
        self.foods.push(food.clone());
        food
    }
}

/// Stand-in for the relational store.
#[derive(Default)]
pub struct InMemoryCookbook {
    tables: RwLock<Tables>,
    list_calls: AtomicU64,
}

impl InMemoryCookbook {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cookbook with the sample recipes the site ships with.
    pub fn seeded() -> Self {
        let mut tables = Tables::default();
        for (name, desc, instructions, ingredients) in SEED {
            let ingredients = ingredients
                .iter()
                .map(|(food, amount, unit, note)| Ingredient {
                    food: tables.food(food),
                    amount: Amount::from_thousandths(*amount).ok(),
                    unit_of_measure: (*unit).to_string(),
                    desc: (*note).to_string(),
                })
                .collect();
            tables.recipes.push(Recipe {
                id: Uuid::new_v4(),
                name: (*name).to_string(),
                desc: Some((*desc).to_string()),
                instructions: Some((*instructions).to_string()),
                ingredients,
            });
        }

        Self {
            tables: RwLock::new(tables),
            list_calls: AtomicU64::new(0),
        }
    }

    /// How many times the full listing was queried.
    pub fn list_calls(&self) -> u64 {
        self.list_calls.load(Ordering::SeqCst)
    }
}

type SeedIngredient = (&'static str, u32, &'static str, &'static str);

const SEED: &[(&str, &str, &str, &[SeedIngredient])] = &[
    (
        "Guacamole",
        "Chunky avocado dip.",
        "Mash the avocados, fold in everything else, season to taste.",
        &[
            ("avocado", 3_000, "whole", "ripe"),
            ("lime", 1_000, "whole", "juiced"),
            ("garlic", 2_000, "cloves", "minced"),
            ("salt", 250, "tsp", ""),
        ],
    ),
    (
        "Pico de gallo",
        "Fresh tomato salsa.",
        "Dice, combine and rest for fifteen minutes.",
        &[
            ("tomato", 4_000, "whole", "diced"),
            ("onion", 500, "cup", "finely chopped"),
            ("lime", 500, "whole", "juiced"),
            ("salt", 125, "tsp", ""),
        ],
    ),
    (
        "Vinaigrette",
        "House salad dressing.",
        "Shake everything in a jar.",
        &[
            ("olive oil", 750, "cup", ""),
            ("vinegar", 250, "cup", "red wine"),
            ("garlic", 1_000, "cloves", "grated"),
        ],
    ),
];

#[async_trait]
impl CookbookRepo for InMemoryCookbook {
    async fn list_recipes(&self) -> Result<Vec<Recipe>, RepoError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let mut recipes = self.tables.read().await.recipes.clone();
        recipes.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(recipes)
    }

    async fn find_recipe(&self, id: Uuid) -> Result<Option<Recipe>, RepoError> {
        let tables = self.tables.read().await;
        Ok(tables.recipes.iter().find(|recipe| recipe.id == id).cloned())
    }

    async fn create_recipe(&self, params: CreateRecipeParams) -> Result<Recipe, RepoError> {
        let mut tables = self.tables.write().await;
        if tables
            .recipes
            .iter()
            .any(|recipe| recipe.name.eq_ignore_ascii_case(&params.name))
        {
            return Err(RepoError::InvalidInput {
                message: format!("a recipe named `{}` already exists", params.name),
            });
        }

        let ingredients = params
            .ingredients
            .into_iter()
            .map(|ingredient| Ingredient {
                food: tables.food(&ingredient.food),
                amount: ingredient.amount,
                unit_of_measure: ingredient.unit_of_measure,
                desc: ingredient.desc,
            })
            .collect();
        let recipe = Recipe {
            id: Uuid::new_v4(),
            name: params.name,
            desc: params.desc,
            instructions: params.instructions,
            ingredients,
        };
        tables.recipes.push(recipe.clone());
        Ok(recipe)
    }
}

use crate::application::recipes::RecipeService;
use crate::cache::ResponseCache;

#[derive(Clone)]
pub struct AdminState {
    pub recipes: RecipeService,
    pub cache: ResponseCache,
}

//! Cookbook entities.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::DomainError;

/// Longest name accepted for recipes, foods and units.
pub const MAX_NAME_LEN: usize = 255;

/// A preparation of food.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: Uuid,
    pub name: String,
    pub desc: Option<String>,
    pub instructions: Option<String>,
    pub ingredients: Vec<Ingredient>,
}

impl fmt::Display for Recipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// An edible item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Food {
    pub id: Uuid,
    pub name: String,
}

impl fmt::Display for Food {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A food used in a recipe, e.g. "2 cloves garlic, minced".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingredient {
    pub food: Food,
    pub amount: Option<Amount>,
    /// tsp, tbsp, cup, ...
    pub unit_of_measure: String,
    pub desc: String,
}

impl Ingredient {
    /// `"{recipe}: {amount} {unit_of_measure} {food}"`.
    pub fn label(&self, recipe: &Recipe) -> String {
        format!("{recipe}: {}", self.measure())
    }

    /// `"{amount} {unit_of_measure} {food}"`, skipping a missing amount.
    pub fn measure(&self) -> String {
        match &self.amount {
            Some(amount) => format!("{amount} {} {}", self.unit_of_measure, self.food),
            None => format!("{} {}", self.unit_of_measure, self.food),
        }
    }
}

/// Fixed-point quantity with three decimal places (1/8 = 0.125).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(u32);

impl Amount {
    /// Six significant digits, three of them decimals.
    pub const MAX_THOUSANDTHS: u32 = 999_999;

    pub fn from_thousandths(value: u32) -> Result<Self, DomainError> {
        if value > Self::MAX_THOUSANDTHS {
            return Err(DomainError::validation(format!(
                "amount {value}/1000 exceeds 999.999"
            )));
        }
        Ok(Self(value))
    }

    pub fn thousandths(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}", self.0 / 1000, self.0 % 1000)
    }
}

impl FromStr for Amount {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || DomainError::validation(format!("`{value}` is not a valid amount"));
        let (whole, fraction) = value.trim().split_once('.').unwrap_or((value.trim(), ""));
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid());
        }
        if fraction.len() > 3 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let whole: u32 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        let fraction: u32 = format!("{fraction:0<3}").parse().map_err(|_| invalid())?;
        let thousandths = whole
            .checked_mul(1000)
            .and_then(|value| value.checked_add(fraction))
            .ok_or_else(invalid)?;
        Self::from_thousandths(thousandths)
    }
}

/// Validate a required short name.
pub fn validate_name(field: &'static str, value: &str) -> Result<String, DomainError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation(format!("{field} must not be empty")));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(DomainError::validation(format!(
            "{field} must be at most {MAX_NAME_LEN} characters"
        )));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn garlic() -> Ingredient {
        Ingredient {
            food: Food {
                id: Uuid::nil(),
                name: "garlic".to_string(),
            },
            amount: Some("2".parse().expect("amount")),
            unit_of_measure: "cloves".to_string(),
            desc: "minced".to_string(),
        }
    }

    #[test]
    fn ingredient_label_names_recipe_amount_unit_and_food() {
        let recipe = Recipe {
            id: Uuid::nil(),
            name: "Guacamole".to_string(),
            desc: None,
            instructions: None,
            ingredients: vec![garlic()],
        };

        assert_eq!(
            recipe.ingredients[0].label(&recipe),
            "Guacamole: 2.000 cloves garlic"
        );
    }

    #[test]
    fn amounts_parse_fractions_exactly() {
        assert_eq!("0.125".parse::<Amount>().expect("amount").thousandths(), 125);
        assert_eq!(".25".parse::<Amount>().expect("amount").thousandths(), 250);
        assert_eq!("1.5".parse::<Amount>().expect("amount").to_string(), "1.500");
        assert!("0.1234".parse::<Amount>().is_err());
        assert!("1000".parse::<Amount>().is_err());
        assert!("abc".parse::<Amount>().is_err());
        assert!(".".parse::<Amount>().is_err());
    }

    #[test]
    fn names_are_trimmed_and_bounded() {
        assert_eq!(validate_name("name", "  Pancakes ").expect("valid"), "Pancakes");
        assert!(validate_name("name", "   ").is_err());
        assert!(validate_name("name", &"x".repeat(MAX_NAME_LEN + 1)).is_err());
    }
}

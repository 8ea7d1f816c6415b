//! Typed calls to the Meal API.
//!
//! Weeks start on Monday. Dates travel as `YYYY-MM-DD`.

use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::client::http_client::{ApiClient, UnauthorizedHandler};
use crate::client::token_store::StorageBackend;
use crate::error::ApiError;

/// Shortest search term worth sending.
pub const MIN_SEARCH_LEN: usize = 3;

/// Which meal of the day.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MealType {
    Lunch,
    Dinner,
}

/// One planned meal for both persons.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meal {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub date: NaiveDate,
    pub meal_type: MealType,
    #[serde(default)]
    pub person1: Option<String>,
    #[serde(default)]
    pub person2: Option<String>,
    #[serde(default)]
    pub person1_url: Option<String>,
    #[serde(default)]
    pub person2_url: Option<String>,
}

impl Meal {
    /// Creates an empty entry for `date`.
    pub fn new(date: NaiveDate, meal_type: MealType) -> Self {
        Self {
            id: None,
            date,
            meal_type,
            person1: None,
            person2: None,
            person1_url: None,
            person2_url: None,
        }
    }

    /// Copies person 1's dish and link to person 2.
    pub fn copy_person1_to_person2(&mut self) {
        self.person2 = self.person1.clone();
        self.person2_url = self.person1_url.clone();
    }
}

/// Display names of the two persons.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelConfig {
    pub person1_label: String,
    pub person2_label: String,
}

/// Answer of a successful save.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveStatus {
    pub status: String,
}

/// A dish suggested by the search endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MealSuggestion {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// Monday of the week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    let offset = u64::from(date.weekday().num_days_from_monday());
    date.checked_sub_days(Days::new(offset)).unwrap_or(date)
}

/// Drops suggestions whose name repeats, ignoring case; first one wins.
pub fn dedupe_suggestions(suggestions: Vec<MealSuggestion>) -> Vec<MealSuggestion> {
    let mut unique: Vec<MealSuggestion> = Vec::with_capacity(suggestions.len());
    for suggestion in suggestions {
        let name = suggestion.name.to_lowercase();
        if !unique.iter().any(|s| s.name.to_lowercase() == name) {
            unique.push(suggestion);
        }
    }
    unique
}

impl<S, H> ApiClient<S, H>
where
    S: StorageBackend,
    H: UnauthorizedHandler,
{
    /// Meals of the week starting at `start` (Monday through Sunday).
    pub async fn week_meals(&self, start: NaiveDate) -> Result<Vec<Meal>, ApiError> {
        let start_date = start.format("%Y-%m-%d").to_string();
        self.get_json("/api/meals/week", &[("start_date", start_date.as_str())])
            .await
    }

    /// Saves a meal, replacing any entry for the same date and meal type.
    pub async fn save_meal(&self, meal: &Meal) -> Result<SaveStatus, ApiError> {
        self.post_json("/api/meals", meal).await
    }

    /// Searches earlier dishes; short terms return nothing without a request.
    pub async fn search_meals(&self, term: &str) -> Result<Vec<MealSuggestion>, ApiError> {
        let term = term.trim();
        if term.chars().count() < MIN_SEARCH_LEN {
            return Ok(Vec::new());
        }
        let suggestions = self.get_json("/api/meals/search", &[("q", term)]).await?;
        Ok(dedupe_suggestions(suggestions))
    }

    pub async fn get_config(&self) -> Result<LabelConfig, ApiError> {
        self.get_json("/api/config", &[]).await
    }

    pub async fn save_config(&self, labels: &LabelConfig) -> Result<serde_json::Value, ApiError> {
        self.post_json("/api/config", labels).await
    }

    /// Backend version document.
    pub async fn version(&self) -> Result<serde_json::Value, ApiError> {
        self.get_json("/api/version", &[]).await
    }
}

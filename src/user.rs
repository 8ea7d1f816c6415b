//! User profile of the signed-in person.
//!
//! The profile is fetched once per session from the provider's userinfo
//! endpoint and only ever kept in memory.

use serde::{Deserialize, Serialize};

/// Authenticated user's profile information.
///
/// Field names follow the standard OpenID Connect userinfo claims; `id` is the
/// `sub` claim.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Unique subject identifier (`sub`)
    #[serde(alias = "sub")]
    pub id: String,

    /// Email address, if the `email` scope was granted
    #[serde(default)]
    pub email: Option<String>,

    /// Full display name
    #[serde(default)]
    pub name: Option<String>,

    /// Login name at the provider
    #[serde(default)]
    pub preferred_username: Option<String>,

    /// Avatar URL
    #[serde(default)]
    pub picture: Option<String>,
}

impl User {
    /// Creates a new User with only the subject set.
    ///
    /// # Example
    ///
    /// ```
    /// # use mealplanner_auth::User;
    /// let user = User::new("4f1c2a".to_string());
    /// assert_eq!(user.id, "4f1c2a");
    /// assert!(user.email.is_none());
    /// ```
    pub fn new(id: String) -> Self {
        Self {
            id,
            email: None,
            name: None,
            preferred_username: None,
            picture: None,
        }
    }

    /// Returns a display name for the header bar.
    ///
    /// Prefers the full name, then the provider username, then email, and
    /// finally the subject id.
    ///
    /// # Example
    ///
    /// ```
    /// # use mealplanner_auth::User;
    /// let mut user = User::new("4f1c2a".to_string());
    /// user.preferred_username = Some("anna".to_string());
    /// assert_eq!(user.display_name(), "anna");
    /// ```
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.preferred_username.as_deref())
            .or(self.email.as_deref())
            .unwrap_or(&self.id)
    }
}

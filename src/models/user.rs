use serde::{Deserialize, Serialize};

/// The identity of the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// The unique identifier for the user.
    pub id: i64,
    /// The user's username.
    pub username: String,
    /// The user's email address.
    #[serde(default)]
    pub email: String,
    /// The user's first name.
    #[serde(default)]
    pub first_name: String,
    /// The user's last name.
    #[serde(default)]
    pub last_name: String,
}

impl UserIdentity {
    /// The name to greet the user with.
    pub fn display_name(&self) -> &str {
        if self.first_name.trim().is_empty() {
            &self.username
        } else {
            &self.first_name
        }
    }
}

/// A user account as managed through the administration endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedUser {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, alias = "firstName")]
    pub first_name: String,
    #[serde(default, alias = "lastName")]
    pub last_name: String,
    #[serde(default = "default_active", alias = "isActive")]
    pub is_active: bool,
    /// Names of the roles assigned to the user.
    #[serde(default)]
    pub roles: Vec<String>,
}

/// A role grouping permission strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

fn default_active() -> bool {
    true
}

use garde::Validate;

use crate::error::{AppError, Result};

/// The login prompt, checked before any network call is made.
#[derive(Validate)]
pub struct LoginForm<'a> {
    #[garde(length(min = 1, max = 150))]
    pub username: &'a str,
    #[garde(length(min = 1, max = 128))]
    pub password: &'a str,
}

impl<'a> LoginForm<'a> {
    pub fn new(username: &'a str, password: &'a str) -> Self {
        Self { username, password }
    }

    /// Validates the form.
    ///
    /// # Returns
    ///
    /// A `Result<()>` indicating whether the form can be submitted.
    pub fn check(&self) -> Result<()> {
        if self.username.trim().is_empty() {
            return Err(AppError::Validation("Username is required".to_string()));
        }
        self.validate()
            .map_err(|report| AppError::Validation(report.to_string()))
    }
}

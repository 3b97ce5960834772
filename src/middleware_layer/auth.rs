use http::StatusCode;
use http::header::{AUTHORIZATION, HeaderValue};

use crate::error::{AppError, Result};
use crate::services::auth::SessionManager;

/// Sits in front of every REST call the client makes.
///
/// Attaches the bearer token of the current session and turns a 401 answer
/// into a global logout.
#[derive(Clone)]
pub struct AuthInterceptor {
    client: reqwest::Client,
    session: SessionManager,
    logout_path: String,
}

impl AuthInterceptor {
    pub fn new(client: reqwest::Client, session: SessionManager, logout_path: &str) -> Self {
        Self {
            client,
            session,
            logout_path: logout_path.to_string(),
        }
    }

    /// The underlying HTTP client, for building requests.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Sends a request.
    ///
    /// # Arguments
    ///
    /// * `request` - The request to send.
    ///
    /// # Returns
    ///
    /// A `Result` containing the response. A 401 response yields
    /// `AppError::Unauthorized` after the session has been torn down.
    pub async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let mut request = request.build()?;

        if !request.headers().contains_key(AUTHORIZATION) {
            if let Some(token) = self.session.token() {
                let value = HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|_| AppError::Internal("token is not a valid header value".to_string()))?;
                request.headers_mut().insert(AUTHORIZATION, value);
            }
        }

        let path = request.url().path().to_string();
        tracing::debug!("➡️ {} {}", request.method(), path);
        let response = self.client.execute(request).await?;

        if response.status() == StatusCode::UNAUTHORIZED && !path.ends_with(&self.logout_path) {
            tracing::warn!("❌ 401 from {}, ending session", path);
            self.session.logout().await;
            return Err(AppError::Unauthorized);
        }

        Ok(response)
    }
}

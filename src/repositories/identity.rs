use async_trait::async_trait;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use sonic_rs::{JsonValueTrait, Value};

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::session::{Credentials, LoginGrant};
use crate::models::user::UserIdentity;

const TOKEN_FIELDS: [&str; 4] = ["access_token", "access", "accessToken", "token"];

/// The backend that issues and revokes bearer tokens.
#[async_trait]
pub trait IdentityBackend: Send + Sync {
    /// Exchanges credentials for a token and the user it belongs to.
    async fn authenticate(&self, credentials: &Credentials) -> Result<LoginGrant>;

    /// Tells the backend the token is no longer in use.
    async fn revoke(&self, token: &str) -> Result<()>;
}

/// The REST identity backend.
pub struct HttpIdentityBackend {
    client: reqwest::Client,
    login_url: String,
    logout_url: String,
}

impl HttpIdentityBackend {
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            login_url: config.url(&config.login_path),
            logout_url: config.url(&config.logout_path),
        }
    }
}

#[async_trait]
impl IdentityBackend for HttpIdentityBackend {
    async fn authenticate(&self, credentials: &Credentials) -> Result<LoginGrant> {
        let body = sonic_rs::to_string(credentials)?;
        let response = self
            .client
            .post(&self.login_url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;
        let payload: Value = sonic_rs::from_slice(&bytes).unwrap_or_default();

        if !status.is_success() {
            return Err(AppError::Authentication(format!(
                "{} ({})",
                error_message(&payload).unwrap_or("login rejected"),
                status.as_u16()
            )));
        }

        parse_grant(&payload, &credentials.username)
    }

    async fn revoke(&self, token: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.logout_url)
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Status {
                status: response.status().as_u16(),
                message: "logout rejected".to_string(),
            });
        }
        Ok(())
    }
}

/// Builds a grant from a login response, tolerating the field spellings the
/// backend has used over time.
pub fn parse_grant(payload: &Value, typed_username: &str) -> Result<LoginGrant> {
    if payload.get("success").and_then(|v| v.as_bool()) == Some(false) {
        return Err(AppError::Authentication(
            error_message(payload).unwrap_or("login rejected").to_string(),
        ));
    }

    let token = TOKEN_FIELDS
        .iter()
        .find_map(|field| payload.get(*field).and_then(|v| v.as_str()))
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::Authentication("response carried no token".to_string()))?
        .to_string();

    let refresh_token = string_field(payload, &["refresh_token", "refresh"]).map(str::to_string);

    // Some deployments nest the profile under `user`.
    let profile = payload
        .get("user")
        .filter(|user| user.is_object())
        .unwrap_or(payload);

    let email = string_field(profile, &["email"]).unwrap_or_default();
    let user = UserIdentity {
        id: int_field(profile, &["user_id", "id"]).unwrap_or_default(),
        username: string_field(profile, &["username"])
            .or_else(|| (!email.is_empty()).then_some(email))
            .unwrap_or(typed_username)
            .to_string(),
        email: email.to_string(),
        first_name: string_field(profile, &["first_name", "firstname", "firstName"])
            .unwrap_or_default()
            .to_string(),
        last_name: string_field(profile, &["last_name", "lastname", "lastName"])
            .unwrap_or_default()
            .to_string(),
    };

    Ok(LoginGrant {
        token,
        refresh_token,
        user,
    })
}

fn string_field<'a>(value: &'a Value, fields: &[&str]) -> Option<&'a str> {
    fields
        .iter()
        .find_map(|field| value.get(*field).and_then(|v| v.as_str()))
}

fn int_field(value: &Value, fields: &[&str]) -> Option<i64> {
    fields.iter().find_map(|field| {
        let v = value.get(*field)?;
        v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
    })
}

fn error_message(payload: &Value) -> Option<&str> {
    if let Some(first) = payload
        .get("non_field_errors")
        .and_then(|errors| errors.get(0))
        .and_then(|v| v.as_str())
    {
        return Some(first);
    }
    string_field(payload, &["detail", "message", "error"])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Result<LoginGrant> {
        let payload: Value = sonic_rs::from_str(raw).unwrap();
        parse_grant(&payload, "typed")
    }

    #[test]
    fn reads_the_flat_login_response() {
        let grant = parse(
            r#"{"success":true,"access":"tok","refresh":"ref","user_id":4,"username":"alice",
                "email":"a@grid.example","first_name":"Alice","last_name":"Moyo"}"#,
        )
        .unwrap();
        assert_eq!(grant.token, "tok");
        assert_eq!(grant.refresh_token.as_deref(), Some("ref"));
        assert_eq!(grant.user.id, 4);
        assert_eq!(grant.user.display_name(), "Alice");
    }

    #[test]
    fn reads_nested_users_and_alternate_spellings() {
        let grant = parse(
            r#"{"accessToken":"tok","user":{"id":"9","email":"b@grid.example","firstname":"Ben"}}"#,
        )
        .unwrap();
        assert_eq!(grant.user.id, 9);
        assert_eq!(grant.user.username, "b@grid.example");
        assert_eq!(grant.user.first_name, "Ben");
    }

    #[test]
    fn falls_back_to_the_typed_username() {
        let grant = parse(r#"{"token":"tok"}"#).unwrap();
        assert_eq!(grant.user.username, "typed");
    }

    #[test]
    fn missing_token_or_explicit_failure_is_rejected() {
        assert!(matches!(parse(r#"{"success":true}"#), Err(AppError::Authentication(_))));
        assert!(matches!(parse(r#"{"access":""}"#), Err(AppError::Authentication(_))));
        assert!(matches!(
            parse(r#"{"success":false,"access":"tok","message":"locked"}"#),
            Err(AppError::Authentication(msg)) if msg == "locked"
        ));
    }
}

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use zeroize::Zeroizing;

/// The application's configuration.
#[derive(Clone)]
pub struct Config {
    /// The base URL of the backend, without a trailing slash.
    pub api_base_url: String,
    /// The path of the login endpoint.
    pub login_path: String,
    /// The path of the logout endpoint.
    pub logout_path: String,
    /// The path returning the current user's permissions.
    pub permissions_path: String,
    /// The prefix under which the entity collections live.
    pub resource_prefix: String,
    /// The path of the server-sent event stream.
    pub stream_path: String,
    /// The path of the one-shot latest readings endpoint.
    pub latest_path: String,
    /// The URL of the Redis server backing the durable storage scope.
    pub redis_url: Option<String>,
    /// The key prefix used in durable storage.
    pub storage_namespace: String,
    /// How long before token expiry the session is torn down.
    pub expiry_margin: Duration,
    /// The timeout applied to every REST request.
    pub request_timeout: Duration,
    /// The delay before reconnecting the stream when the server gives no hint.
    pub stream_retry: Duration,
    /// The username the headless runner logs in with.
    pub username: Option<String>,
    /// The password the headless runner logs in with.
    pub password: Option<Zeroizing<String>>,
    /// Whether the runner persists its session in the durable scope.
    pub remember: bool,
    /// The minimum interval between two dashboard summaries.
    pub summary_interval: Duration,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_base_url", &self.api_base_url)
            .field("redis_url", &self.redis_url.as_ref().map(|_| "[REDACTED]"))
            .field("storage_namespace", &self.storage_namespace)
            .field("expiry_margin", &self.expiry_margin)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("remember", &self.remember)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Creates a new `Config` from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("GRIDWATCH_{}", name));
        let parse_u64 = |name: &str, default: u64| -> Result<u64> {
            match var(name) {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .with_context(|| format!("Invalid GRIDWATCH_{}", name)),
                None => Ok(default),
            }
        };

        let mut config = Self::for_base_url(
            &var("API_BASE_URL").unwrap_or_else(|| "http://localhost:8000".to_string()),
        );
        if !config.api_base_url.starts_with("http://")
            && !config.api_base_url.starts_with("https://")
        {
            anyhow::bail!("GRIDWATCH_API_BASE_URL must be an http(s) URL");
        }

        if let Some(path) = var("LOGIN_PATH") {
            config.login_path = path;
        }
        if let Some(path) = var("LOGOUT_PATH") {
            config.logout_path = path;
        }
        if let Some(path) = var("PERMISSIONS_PATH") {
            config.permissions_path = path;
        }
        if let Some(prefix) = var("RESOURCE_PREFIX") {
            config.resource_prefix = prefix;
        }
        if let Some(path) = var("STREAM_PATH") {
            config.stream_path = path;
        }
        if let Some(path) = var("LATEST_PATH") {
            config.latest_path = path;
        }
        if let Some(namespace) = var("STORAGE_NAMESPACE") {
            config.storage_namespace = namespace;
        }
        if let Some(raw) = var("REMEMBER") {
            config.remember = parse_flag(&raw).context("Invalid GRIDWATCH_REMEMBER")?;
        }

        config.redis_url = var("REDIS_URL").filter(|url| !url.trim().is_empty());
        config.username = var("USERNAME");
        config.password = var("PASSWORD").map(Zeroizing::new);
        config.expiry_margin = Duration::from_secs(parse_u64("EXPIRY_MARGIN_SECS", 5)?);
        config.request_timeout = Duration::from_secs(parse_u64("REQUEST_TIMEOUT_SECS", 30)?);
        config.stream_retry = Duration::from_millis(parse_u64("STREAM_RETRY_MS", 3000)?);
        config.summary_interval = Duration::from_secs(parse_u64("SUMMARY_INTERVAL_SECS", 30)?);

        Ok(config)
    }

    /// Builds the default configuration around a base URL.
    pub fn for_base_url(api_base_url: &str) -> Self {
        Self {
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            login_path: "/auth/login/".to_string(),
            logout_path: "/auth/logout/".to_string(),
            permissions_path: "/users/me/permissions/".to_string(),
            resource_prefix: "/api/v1".to_string(),
            stream_path: "/realtime/stream/".to_string(),
            latest_path: "/realtime/latest/".to_string(),
            redis_url: None,
            storage_namespace: "gridwatch".to_string(),
            expiry_margin: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            stream_retry: Duration::from_millis(3000),
            username: None,
            password: None,
            remember: true,
            summary_interval: Duration::from_secs(30),
        }
    }

    /// Joins a path onto the base URL.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.api_base_url, path)
        } else {
            format!("{}/{}", self.api_base_url, path)
        }
    }
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("expected a boolean, got {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.api_base_url, "http://localhost:8000");
        assert_eq!(config.expiry_margin, Duration::from_secs(5));
        assert_eq!(config.stream_retry, Duration::from_millis(3000));
        assert!(config.redis_url.is_none());
        assert!(config.remember);
    }

    #[test]
    fn overrides_are_read_and_trailing_slash_is_trimmed() {
        let config = Config::from_lookup(lookup(&[
            ("GRIDWATCH_API_BASE_URL", "https://grid.example/"),
            ("GRIDWATCH_EXPIRY_MARGIN_SECS", "10"),
            ("GRIDWATCH_REMEMBER", "no"),
            ("GRIDWATCH_PASSWORD", "hunter2"),
        ]))
        .unwrap();
        assert_eq!(config.api_base_url, "https://grid.example");
        assert_eq!(config.expiry_margin, Duration::from_secs(10));
        assert!(!config.remember);
        assert_eq!(config.password.as_deref().map(String::as_str), Some("hunter2"));
        assert_eq!(config.url("/realtime/stream/"), "https://grid.example/realtime/stream/");
    }

    #[test]
    fn invalid_numbers_and_urls_are_rejected() {
        assert!(Config::from_lookup(lookup(&[("GRIDWATCH_STREAM_RETRY_MS", "soon")])).is_err());
        assert!(Config::from_lookup(lookup(&[("GRIDWATCH_API_BASE_URL", "grid.example")])).is_err());
        assert!(Config::from_lookup(lookup(&[("GRIDWATCH_REMEMBER", "maybe")])).is_err());
    }

    #[test]
    fn debug_output_redacts_the_password() {
        let mut config = Config::for_base_url("http://127.0.0.1:9000");
        config.password = Some(Zeroizing::new("s3cret".to_string()));
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("127.0.0.1:9000"));
    }
}

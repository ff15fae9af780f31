use std::{env, time::Duration};

use super::error::{CouchDaoError, CouchResult};

const BASE_URL_ENV: &str = "COUCH_BASE_URL";
const DATABASE_ENV: &str = "COUCH_DB";
const USERNAME_ENV: &str = "COUCH_USERNAME";
const PASSWORD_ENV: &str = "COUCH_PASSWORD";
const DEFAULT_DATABASE: &str = "word_relay";
/// How long CouchDB may hold a `_changes` long-poll open before answering empty.
const DEFAULT_CHANGES_TIMEOUT: Duration = Duration::from_secs(25);

/// Connection settings for the shared CouchDB database all clients of a session use.
#[derive(Debug, Clone)]
pub struct CouchConfig {
    /// Server URL, without the database path.
    pub base_url: String,
    /// Database shared by every client.
    pub database: String,
    /// Basic-auth user, if any.
    pub username: Option<String>,
    /// Basic-auth password, if any.
    pub password: Option<String>,
    /// Long-poll timeout of the `_changes` feed.
    pub changes_timeout: Duration,
}

impl CouchConfig {
    /// Construct a configuration from explicit base URL and database name.
    pub fn new(base_url: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            database: database.into(),
            username: None,
            password: None,
            changes_timeout: DEFAULT_CHANGES_TIMEOUT,
        }
    }

    /// Attach basic-auth credentials to the configuration.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Build a configuration from the environment.
    ///
    /// `COUCH_BASE_URL` is required; `COUCH_DB` defaults to `word_relay` and credentials are
    /// only attached when both `COUCH_USERNAME` and `COUCH_PASSWORD` are set.
    pub fn from_env() -> CouchResult<Self> {
        let base_url = env::var(BASE_URL_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .ok_or(CouchDaoError::MissingEnvVar { var: BASE_URL_ENV })?;
        let database = env::var(DATABASE_ENV).unwrap_or_else(|_| DEFAULT_DATABASE.to_string());

        let mut config = Self::new(base_url, database);
        if let (Ok(username), Ok(password)) = (env::var(USERNAME_ENV), env::var(PASSWORD_ENV)) {
            config = config.with_credentials(username, password);
        }

        Ok(config)
    }
}

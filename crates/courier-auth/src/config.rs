//! Auth responder configuration loaded from environment variables.

use std::path::PathBuf;

#[derive(Clone)]
pub struct AuthConfig {
    /// Env: `AMQP_URL`. Required by the binary.
    pub amqp_url: Option<String>,

    /// Env: `DATABASE_PATH`
    /// Default: `./data/courier.db`
    pub database_path: PathBuf,

    /// HS256 secret shared with token issuers.
    /// Env: `JWT_SECRET`
    pub jwt_secret: Option<String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("amqp", &self.amqp_url.is_some())
            .field("database_path", &self.database_path)
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            amqp_url: None,
            database_path: PathBuf::from("./data/courier.db"),
            jwt_secret: None,
        }
    }
}

impl AuthConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        config.amqp_url = lookup("AMQP_URL").filter(|v| !v.is_empty());
        config.jwt_secret = lookup("JWT_SECRET").filter(|v| !v.is_empty());

        if let Some(path) = lookup("DATABASE_PATH").filter(|v| !v.is_empty()) {
            config.database_path = PathBuf::from(path);
        }

        config
    }
}

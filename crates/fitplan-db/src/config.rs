use std::env;

/// Database configuration.
///
/// Reads from the `FITPLAN_DATABASE_URL` environment variable, falling back
/// to `postgresql://localhost:5432/fitplan` when unset.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Full PostgreSQL connection URL.
    pub database_url: String,
}

impl DbConfig {
    /// The default connection URL used when no environment variable is set.
    pub const DEFAULT_URL: &str = "postgresql://localhost:5432/fitplan";

    /// Environment variable consulted by [`Self::from_env`].
    pub const ENV_VAR: &str = "FITPLAN_DATABASE_URL";

    /// Build a config from the environment.
    pub fn from_env() -> Self {
        let database_url =
            env::var(Self::ENV_VAR).unwrap_or_else(|_| Self::DEFAULT_URL.to_owned());
        Self { database_url }
    }

    /// Build a config from an explicit URL (tests and CLI flags).
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }

    /// Extract the database name from the URL.
    ///
    /// Query parameters are ignored. Returns `None` when the URL has no
    /// path component.
    pub fn database_name(&self) -> Option<&str> {
        let without_query = self
            .database_url
            .split_once('?')
            .map_or(self.database_url.as_str(), |(base, _)| base);
        without_query
            .strip_prefix("postgresql://")
            .or_else(|| without_query.strip_prefix("postgres://"))
            .and_then(|rest| rest.split_once('/'))
            .map(|(_, name)| name)
            .filter(|name| !name.is_empty())
    }

    /// URL of the `postgres` maintenance database on the same server, used
    /// to issue `CREATE DATABASE` when the target does not exist yet.
    pub fn maintenance_url(&self) -> String {
        match self.database_url.rfind('/') {
            Some(pos) => {
                let mut url = self.database_url[..pos].to_owned();
                url.push_str("/postgres");
                url
            }
            None => self.database_url.clone(),
        }
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

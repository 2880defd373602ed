//! Connection configuration.
use std::env;

/// Startup parameters for a [`Connection`][crate::Connection].
///
/// There is no connection-string parsing; fields are set explicitly or
/// picked up from the conventional `PG*` environment variables via
/// [`Config::from_env`].
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) user: String,
    pub(crate) password: Option<String>,
    pub(crate) database: Option<String>,
}

impl Config {
    /// A config pointing at `localhost:5432` with the `postgres` user.
    pub fn new() -> Config {
        Config {
            host: "localhost".into(),
            port: 5432,
            user: "postgres".into(),
            password: None,
            database: None,
        }
    }

    /// Build a config from `PGHOST`, `PGPORT`, `PGUSER`, `PGPASSWORD`
    /// and `PGDATABASE`, falling back to the defaults of [`Config::new`]
    /// for anything unset.
    pub fn from_env() -> Config {
        let mut config = Config::new();
        if let Ok(host) = env::var("PGHOST") {
            config.host = host;
        }
        if let Some(port) = env::var("PGPORT").ok().and_then(|p| p.parse().ok()) {
            config.port = port;
        }
        if let Ok(user) = env::var("PGUSER") {
            config.user = user;
        }
        if let Ok(password) = env::var("PGPASSWORD") {
            config.password = Some(password);
        }
        if let Ok(database) = env::var("PGDATABASE") {
            config.database = Some(database);
        }
        config
    }

    pub fn host(mut self, host: impl Into<String>) -> Config {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Config {
        self.port = port;
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Config {
        self.user = user.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Config {
        self.password = Some(password.into());
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Config {
        self.database = Some(database.into());
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

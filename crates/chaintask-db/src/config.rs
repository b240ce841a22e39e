//! Database configuration.
//!
//! The control plane runs long-lived worker pools against PostgreSQL, so
//! the connection budget and acquire timeout are configuration rather than
//! constants: a deployment running `work --workers N` sizes the pool to
//! match without recompiling. All knobs resolve env-first.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Connection settings for the task store.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Full PostgreSQL connection URL, options suffix
    /// (`?sslmode=require`) allowed.
    pub database_url: String,
    /// Upper bound on pooled connections. Claim and mark operations from
    /// every worker contend on this; size it to at least the worker count
    /// plus one for the submission side.
    pub max_connections: u32,
    /// How long an operation waits for a pooled connection before it
    /// fails.
    pub acquire_timeout: Duration,
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok()?.parse().ok()
}

impl DbConfig {
    pub const DEFAULT_URL: &str = "postgresql://localhost:5432/chaintask";
    pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
    pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

    /// Build a config from the environment.
    ///
    /// Reads `CHAINTASK_DATABASE_URL`, `CHAINTASK_DB_MAX_CONNECTIONS`,
    /// and `CHAINTASK_DB_ACQUIRE_TIMEOUT_SECS`; anything unset or
    /// unparsable falls back to its default.
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("CHAINTASK_DATABASE_URL")
                .unwrap_or_else(|_| Self::DEFAULT_URL.to_owned()),
            max_connections: env_parse("CHAINTASK_DB_MAX_CONNECTIONS")
                .unwrap_or(Self::DEFAULT_MAX_CONNECTIONS),
            acquire_timeout: env_parse::<u64>("CHAINTASK_DB_ACQUIRE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(Self::DEFAULT_ACQUIRE_TIMEOUT),
        }
    }

    /// Build a config from an explicit URL with default pool settings
    /// (tests, CLI flags).
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: Self::DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: Self::DEFAULT_ACQUIRE_TIMEOUT,
        }
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_acquire_timeout(mut self, acquire_timeout: Duration) -> Self {
        self.acquire_timeout = acquire_timeout;
        self
    }

    /// The database name: the path segment after the authority, with any
    /// `?options`/`#fragment` suffix stripped.
    ///
    /// Returns `None` when the URL has no path (`postgresql://host:5432`)
    /// or an empty one.
    pub fn database_name(&self) -> Option<&str> {
        let (_, rest) = self.database_url.split_once("://")?;
        let (_, path) = rest.split_once('/')?;
        let name = path.split(['?', '#']).next()?;
        (!name.is_empty()).then_some(name)
    }

    /// The same server with the path swapped for the `postgres`
    /// maintenance database, preserving any options suffix. Used to issue
    /// `CREATE DATABASE` before the target database exists.
    pub fn maintenance_url(&self) -> String {
        let Some((scheme, rest)) = self.database_url.split_once("://") else {
            return self.database_url.clone();
        };
        match rest.split_once('/') {
            Some((authority, path)) => {
                let options = path.find(['?', '#']).map(|i| &path[i..]).unwrap_or("");
                format!("{scheme}://{authority}/postgres{options}")
            }
            None => format!("{scheme}://{rest}/postgres"),
        }
    }
}

//! Runtime configuration for the archiving engine.
//!
//! The binary fills an [`ArchiverConfig`] from its config file and flags; the
//! library only sees the validated result.

use std::time::Duration;

use thiserror::Error;

use crate::db::DatabaseOptions;
use crate::fetch::{
    CONNECT_TIMEOUT_SECS, DEFAULT_MAX_CONCURRENT_FETCHES, HttpSettings, READ_TIMEOUT_SECS,
};
use crate::user_agent;

/// Upper bound for `max_concurrent_fetches`.
pub const MAX_CONCURRENT_FETCHES_LIMIT: usize = 64;

/// Upper bound for either timeout.
pub const MAX_TIMEOUT_SECS: u64 = 3_600;

/// Upper bound for the database pool size.
pub const MAX_DB_CONNECTIONS: u32 = 20;

/// Invalid configuration value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for `{field}`: {value}. Expected range: {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },

    #[error("invalid value for `user_agent`: must not be empty")]
    EmptyUserAgent,
}

/// Tunables shared by the fetch layer, the orchestrator and the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiverConfig {
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    /// Network fetches allowed to run at once.
    pub max_concurrent_fetches: usize,
    /// Overrides the default `webarchiver/<version>` agent.
    pub user_agent: Option<String>,
    pub db: DatabaseOptions,
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            user_agent: None,
            db: DatabaseOptions::default(),
        }
    }
}

impl ArchiverConfig {
    /// Checks every value against its allowed range.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            "connect_timeout_secs",
            self.connect_timeout_secs,
            1,
            MAX_TIMEOUT_SECS,
        )?;
        check_range(
            "read_timeout_secs",
            self.read_timeout_secs,
            1,
            MAX_TIMEOUT_SECS,
        )?;
        check_range(
            "max_concurrent_fetches",
            self.max_concurrent_fetches as u64,
            1,
            MAX_CONCURRENT_FETCHES_LIMIT as u64,
        )?;
        check_range(
            "db_max_connections",
            u64::from(self.db.max_connections),
            1,
            u64::from(MAX_DB_CONNECTIONS),
        )?;
        if self
            .user_agent
            .as_deref()
            .is_some_and(|agent| agent.trim().is_empty())
        {
            return Err(ConfigError::EmptyUserAgent);
        }
        Ok(())
    }

    /// Client settings for the HTTP fetcher.
    #[must_use]
    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            user_agent: self
                .user_agent
                .clone()
                .unwrap_or_else(user_agent::default_user_agent),
        }
    }
}

fn check_range(field: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

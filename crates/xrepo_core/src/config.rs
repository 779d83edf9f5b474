//! Typed view over the repository attribute map.
//!
//! # Responsibility
//! - Resolve recognized attribute keys (and their aliases) into settings for
//!   the pool, connections, schema sync and transactions.
//!
//! # Invariants
//! - Unrecognized keys are ignored here and left untouched in the map.
//! - Pragma names and values are validated before they reach SQL text.
//! - Invalid values fail with `RepoError::Config`; nothing is silently defaulted.

use crate::db::{ConnectionSettings, PoolOptions, SchemaSync};
use crate::query::is_valid_identifier;
use crate::repo::error::{RepoError, RepoResult};
use crate::repo::scope::BeginMode;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_URL: &str = ":memory:";
const PRAGMA_PREFIX: &str = "pragma.";

static PRAGMA_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("invalid pragma value regex"));

#[derive(Debug, Clone)]
pub struct RepoConfig {
    pub url: String,
    pub pool: PoolOptions,
    pub connection: ConnectionSettings,
    pub schema_sync: SchemaSync,
    pub begin_mode: BeginMode,
}

impl RepoConfig {
    pub fn from_attrs(attrs: &BTreeMap<String, String>) -> RepoResult<Self> {
        let url = lookup(attrs, &["url", "jdbcUrl"])
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .unwrap_or(DEFAULT_URL)
            .to_string();

        let defaults = PoolOptions::default();
        let pool = PoolOptions {
            min_idle: number(attrs, &["minIdle", "minimumIdle"], defaults.min_idle)?,
            max_active: number(attrs, &["maxActive", "maximumPoolSize"], defaults.max_active)?,
            acquire_timeout: Duration::from_millis(number(
                attrs,
                &["acquireTimeoutMs"],
                duration_ms(defaults.acquire_timeout),
            )?),
        };
        if pool.max_active == 0 {
            return Err(RepoError::Config("maxActive must be >= 1".to_string()));
        }

        let connection = ConnectionSettings {
            busy_timeout: Duration::from_millis(number(
                attrs,
                &["busyTimeoutMs"],
                duration_ms(ConnectionSettings::default().busy_timeout),
            )?),
            pragmas: pragmas(attrs)?,
        };

        let schema_sync = match lookup(attrs, &["schema.sync"]) {
            None => SchemaSync::None,
            Some(raw) => SchemaSync::parse(raw).ok_or_else(|| {
                RepoError::Config(format!(
                    "schema.sync `{raw}` is not one of none|create|update|validate"
                ))
            })?,
        };

        let begin_mode = match lookup(attrs, &["transaction.begin"]) {
            None => BeginMode::Deferred,
            Some(raw) => BeginMode::parse(raw).ok_or_else(|| {
                RepoError::Config(format!(
                    "transaction.begin `{raw}` is not one of deferred|immediate|exclusive"
                ))
            })?,
        };

        Ok(Self {
            url,
            pool,
            connection,
            schema_sync,
            begin_mode,
        })
    }
}

/// First present key wins, in alias order.
fn lookup<'a>(attrs: &'a BTreeMap<String, String>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| attrs.get(*key))
        .map(String::as_str)
}

fn number<T: FromStr>(attrs: &BTreeMap<String, String>, keys: &[&str], default: T) -> RepoResult<T> {
    match lookup(attrs, keys) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|_| {
            RepoError::Config(format!("attribute `{}` has invalid number `{raw}`", keys[0]))
        }),
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn pragmas(attrs: &BTreeMap<String, String>) -> RepoResult<Vec<(String, String)>> {
    attrs
        .iter()
        .filter_map(|(key, value)| key.strip_prefix(PRAGMA_PREFIX).map(|name| (name, value)))
        .map(|(name, value)| {
            let value = value.trim();
            if !is_valid_identifier(name) {
                return Err(RepoError::Config(format!("invalid pragma name `{name}`")));
            }
            if !PRAGMA_VALUE.is_match(value) {
                return Err(RepoError::Config(format!(
                    "invalid value `{value}` for pragma `{name}`"
                )));
            }
            Ok((name.to_string(), value.to_string()))
        })
        .collect()
}

/**
 * Server Configuration
 *
 * Environment-driven; every knob has a safe default except the database
 * URL. `from_env` reads the process environment, `from_lookup` takes any
 * name-to-value function so tests never touch global state.
 *
 * Variables:
 * - LORE_DATABASE_URL (or DATABASE_URL)   required
 * - LORE_PORT                             default 7207
 * - LORE_RATE_LIMIT_PER_MINUTE            default 100
 * - LORE_DECAY_LAMBDA_PER_DAY             default 0.01
 * - LORE_EMBEDDING_DIM                    default 384
 * - LORE_AUTH_CACHE_TTL_SECS              default 60
 */

use std::time::Duration;

use crate::embedding::EMBEDDING_DIM;
use crate::error::{Error, Result};

pub const DEFAULT_PORT: u16 = 7207;
pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 100;
pub const DEFAULT_DECAY_LAMBDA_PER_DAY: f64 = 0.01;
pub const DEFAULT_AUTH_CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub port: u16,
    pub rate_limit_per_minute: u32,
    pub decay_lambda_per_day: f64,
    pub embedding_dim: usize,
    pub auth_cache_ttl: Duration,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url = lookup("LORE_DATABASE_URL")
            .or_else(|| lookup("DATABASE_URL"))
            .ok_or_else(|| {
                Error::Validation("LORE_DATABASE_URL is required".to_string())
            })?;

        Ok(Self {
            database_url,
            port: parse(&lookup, "LORE_PORT", DEFAULT_PORT)?,
            rate_limit_per_minute: parse(
                &lookup,
                "LORE_RATE_LIMIT_PER_MINUTE",
                DEFAULT_RATE_LIMIT_PER_MINUTE,
            )?,
            decay_lambda_per_day: parse(
                &lookup,
                "LORE_DECAY_LAMBDA_PER_DAY",
                DEFAULT_DECAY_LAMBDA_PER_DAY,
            )?,
            embedding_dim: parse(&lookup, "LORE_EMBEDDING_DIM", EMBEDDING_DIM)?,
            auth_cache_ttl: Duration::from_secs(parse(
                &lookup,
                "LORE_AUTH_CACHE_TTL_SECS",
                DEFAULT_AUTH_CACHE_TTL.as_secs(),
            )?),
        })
    }
}

fn parse<T: std::str::FromStr>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T> {
    match lookup(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| Error::Validation(format!("{} has invalid value '{}'", name, raw))),
        None => Ok(default),
    }
}

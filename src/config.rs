//! Configuration management

use std::collections::HashSet;

use anyhow::{self, Context, Result};

use crate::defaults::DEFAULT_LOGS_DIR;
use crate::services::routing::{
    CircuitBreaker, SecondaryMapServiceConfig, DEFAULT_CIRCUIT_BREAKER_RECOVERY_SECS,
    DEFAULT_CIRCUIT_BREAKER_THRESHOLD, RESERVED_DISTANCE_SOURCE_IDS,
};
use crate::types::DistanceSourceId;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Valhalla routing engine URL (optional, falls back to mock if unavailable)
    pub valhalla_url: Option<String>,

    /// Research providers, each stored under its own distance source
    pub secondary_map_services: Vec<SecondaryMapServiceConfig>,

    /// When a failing research provider is skipped, shared by all runs
    pub circuit_breaker: CircuitBreaker,

    pub logs_dir: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .context("DATABASE_URL must be set")?;

        let valhalla_url = std::env::var("VALHALLA_URL").ok().filter(|url| !url.is_empty());

        let secondary_map_services = parse_secondary_services(
            &std::env::var("SECONDARY_VALHALLA_URLS").unwrap_or_default(),
        )?;

        let threshold = env_i64("CIRCUIT_BREAKER_THRESHOLD", DEFAULT_CIRCUIT_BREAKER_THRESHOLD)?;
        let recovery_secs =
            env_i64("CIRCUIT_BREAKER_RECOVERY_SECS", DEFAULT_CIRCUIT_BREAKER_RECOVERY_SECS)?;
        if threshold < 1 || recovery_secs < 0 {
            anyhow::bail!(
                "Circuit breaker needs a positive threshold and a non-negative recovery time, got {} and {}s",
                threshold,
                recovery_secs
            );
        }

        Ok(Self {
            database_url,
            valhalla_url,
            secondary_map_services,
            circuit_breaker: CircuitBreaker::new(threshold, chrono::Duration::seconds(recovery_secs)),
            logs_dir: logs_dir(),
        })
    }
}

/// Log directory, also needed before the rest of the configuration loads
pub fn logs_dir() -> String {
    std::env::var("LOGS_DIR").unwrap_or_else(|_| DEFAULT_LOGS_DIR.to_string())
}

fn env_i64(name: &str, default: i64) -> Result<i64> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be an integer, got {:?}", name, raw)),
        _ => Ok(default),
    }
}

/// Parses `id=url` entries separated by commas. Ids are the distance
/// sources the rows are stored under, so they must not depend on order.
fn parse_secondary_services(raw: &str) -> Result<Vec<SecondaryMapServiceConfig>> {
    let mut seen = HashSet::new();
    let mut services = Vec::new();

    for entry in raw.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
        let Some((id, url)) = entry.split_once('=') else {
            anyhow::bail!("SECONDARY_VALHALLA_URLS entry must be id=url: {}", entry);
        };
        let id: i64 = id
            .trim()
            .parse()
            .with_context(|| format!("SECONDARY_VALHALLA_URLS entry has a bad source id: {}", entry))?;
        let source_id = DistanceSourceId(id);
        let url = url.trim();

        if id <= 0 {
            anyhow::bail!("SECONDARY_VALHALLA_URLS source id must be positive: {}", entry);
        }
        if RESERVED_DISTANCE_SOURCE_IDS.contains(&source_id) {
            anyhow::bail!("SECONDARY_VALHALLA_URLS source id {} is reserved for a primary provider", id);
        }
        if !seen.insert(source_id) {
            anyhow::bail!("SECONDARY_VALHALLA_URLS source id {} is used twice", id);
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            anyhow::bail!("SECONDARY_VALHALLA_URLS entry is not an http(s) URL: {}", url);
        }

        services.push(SecondaryMapServiceConfig {
            source_id,
            url: url.to_string(),
        });
    }
    Ok(services)
}

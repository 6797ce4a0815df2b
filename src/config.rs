//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. The
//! database URL may be given inline or referenced by env-var name and
//! resolved at runtime.

use anyhow::{bail, Context, Result};
use chrono::Duration;
use serde::Deserialize;
use std::fs;

use crate::engine::RunRequest;
use crate::strategy::{ModelSpec, NEUTRAL_RATING};
use crate::types::{RunType, Scope};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub run: RunConfig,
    #[serde(default)]
    pub elo: EloConfig,
    #[serde(default)]
    pub consensus: ConsensusConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Inline connection URL, e.g. `sqlite://oddsedge.db`.
    #[serde(default)]
    pub url: Option<String>,
    /// Name of the env var holding the URL. Used when `url` is absent.
    #[serde(default)]
    pub url_env: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    MarketConsensus,
    Elo,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RunConfig {
    pub league: String,
    pub market: String,
    pub model: ModelKind,
    #[serde(default = "default_run_type")]
    pub run_type: RunType,
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: i64,
    /// Rate every game with this season's ratings (Elo only).
    #[serde(default)]
    pub season: Option<i32>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EloConfig {
    #[serde(default = "default_rating")]
    pub default_rating: f64,
    #[serde(default = "default_model_version")]
    pub model_version: String,
}

impl Default for EloConfig {
    fn default() -> Self {
        Self {
            default_rating: default_rating(),
            model_version: default_model_version(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConsensusConfig {
    #[serde(default = "default_model_version")]
    pub model_version: String,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            model_version: default_model_version(),
        }
    }
}

fn default_max_connections() -> u32 {
    5
}

fn default_run_type() -> RunType {
    RunType::Manual
}

fn default_lookback_hours() -> i64 {
    24
}

fn default_rating() -> f64 {
    NEUTRAL_RATING
}

fn default_model_version() -> String {
    "1.0".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse and validate configuration from TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.run.lookback_hours <= 0 {
            bail!("run.lookback_hours must be positive, got {}", self.run.lookback_hours);
        }
        if self.run.league.trim().is_empty() || self.run.market.trim().is_empty() {
            bail!("run.league and run.market must be set");
        }
        if self.database.max_connections == 0 {
            bail!("database.max_connections must be at least 1");
        }
        if !self.elo.default_rating.is_finite() {
            bail!("elo.default_rating must be a finite number");
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name).with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Connection URL, inline first, then via `url_env`.
    pub fn database_url(&self) -> Result<String> {
        match (&self.database.url, &self.database.url_env) {
            (Some(url), _) => Ok(url.clone()),
            (None, Some(env)) => Self::resolve_env(env),
            (None, None) => bail!("database.url or database.url_env must be set"),
        }
    }

    /// Model selection for the configured run.
    pub fn model_spec(&self) -> ModelSpec {
        match self.run.model {
            ModelKind::MarketConsensus => ModelSpec::MarketConsensus {
                version: self.consensus.model_version.clone(),
            },
            ModelKind::Elo => ModelSpec::Elo {
                version: self.elo.model_version.clone(),
                season: self.run.season,
                default_rating: self.elo.default_rating,
            },
        }
    }

    pub fn run_request(&self) -> RunRequest {
        RunRequest {
            scope: Scope::new(self.run.league.clone(), self.run.market.clone()),
            run_type: self.run.run_type,
            lookback: Duration::hours(self.run.lookback_hours),
            model: self.model_spec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [database]
        url = "sqlite::memory:"

        [run]
        league = "NBA"
        market = "moneyline"
        model = "market_consensus"
    "#;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::parse(MINIMAL).unwrap();
        assert_eq!(cfg.run.lookback_hours, 24);
        assert_eq!(cfg.run.run_type, RunType::Manual);
        assert_eq!(cfg.database.max_connections, 5);
        assert_eq!(cfg.elo.default_rating, 1500.0);

        let request = cfg.run_request();
        assert_eq!(request.scope, Scope::new("NBA", "moneyline"));
        assert_eq!(request.lookback, Duration::hours(24));
        assert_eq!(
            request.model,
            ModelSpec::MarketConsensus {
                version: "1.0".to_string()
            }
        );
    }

    #[test]
    fn test_elo_selection() {
        let cfg = AppConfig::parse(
            r#"
            [database]
            url = "sqlite://odds.db"

            [run]
            league = "NHL"
            market = "moneyline"
            model = "elo"
            run_type = "scheduled"
            lookback_hours = 6
            season = 2024

            [elo]
            default_rating = 1450.0
            model_version = "2.0"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.run.run_type, RunType::Scheduled);
        assert_eq!(
            cfg.model_spec(),
            ModelSpec::Elo {
                version: "2.0".to_string(),
                season: Some(2024),
                default_rating: 1450.0,
            }
        );
    }

    #[test]
    fn test_unknown_model_rejected() {
        let text = MINIMAL.replace("market_consensus", "neural_net");
        assert!(AppConfig::parse(&text).is_err());
    }

    #[test]
    fn test_non_positive_lookback_rejected() {
        let text = MINIMAL.replace(
            "model = \"market_consensus\"",
            "model = \"market_consensus\"\nlookback_hours = 0",
        );
        let err = AppConfig::parse(&text).unwrap_err();
        assert!(err.to_string().contains("lookback_hours"));
    }

    #[test]
    fn test_database_url_from_env() {
        let text = MINIMAL.replace(
            "url = \"sqlite::memory:\"",
            "url_env = \"ODDSEDGE_TEST_DATABASE_URL\"",
        );
        let cfg = AppConfig::parse(&text).unwrap();
        std::env::set_var("ODDSEDGE_TEST_DATABASE_URL", "sqlite://from-env.db");
        assert_eq!(cfg.database_url().unwrap(), "sqlite://from-env.db");
        std::env::remove_var("ODDSEDGE_TEST_DATABASE_URL");
        assert!(cfg.database_url().is_err());
    }
}

//! SQLite store.
//!
//! Decimal values are stored as TEXT and parsed back into `Decimal` so no
//! precision is lost to REAL columns. Timestamps are UTC, so the first ten
//! characters of a stored timestamp are its calendar day.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, info, instrument};

use super::{OddsStore, RunParameters};
use crate::types::{
    BetRecommendation, FairPrice, GameInfo, ModelId, ModelIdentity, ModelRun, OddsObservation,
    Outcome, RunId, RunType, Scope, TeamId,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS leagues (
        id INTEGER PRIMARY KEY,
        code TEXT NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS market_types (
        id INTEGER PRIMARY KEY,
        code TEXT NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS providers (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS teams (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        league_code TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS games (
        id INTEGER PRIMARY KEY,
        league_code TEXT NOT NULL,
        home_team_id INTEGER NOT NULL,
        away_team_id INTEGER NOT NULL,
        season INTEGER NOT NULL,
        start_time TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS odds_observations (
        id INTEGER PRIMARY KEY,
        provider_id INTEGER NOT NULL,
        game_id INTEGER NOT NULL,
        market_code TEXT NOT NULL,
        outcome TEXT NOT NULL,
        snapshot_time TEXT NOT NULL,
        american_odds INTEGER,
        decimal_odds TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_observations_game_time
        ON odds_observations (game_id, snapshot_time)",
    "CREATE TABLE IF NOT EXISTS team_ratings (
        season INTEGER NOT NULL,
        team_id INTEGER NOT NULL,
        rating REAL NOT NULL,
        PRIMARY KEY (season, team_id)
    )",
    "CREATE TABLE IF NOT EXISTS models (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        version TEXT NOT NULL,
        type_code TEXT NOT NULL,
        UNIQUE (name, version)
    )",
    "CREATE TABLE IF NOT EXISTS model_runs (
        id INTEGER PRIMARY KEY,
        model_id INTEGER NOT NULL,
        run_type TEXT NOT NULL,
        league_code TEXT NOT NULL,
        market_code TEXT NOT NULL,
        started_at TEXT NOT NULL,
        finished_at TEXT,
        parameters TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS model_predictions (
        id INTEGER PRIMARY KEY,
        run_id INTEGER NOT NULL,
        game_id INTEGER NOT NULL,
        provider_id INTEGER,
        outcome TEXT NOT NULL,
        probability TEXT NOT NULL,
        decimal_odds TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS bet_recommendations (
        id INTEGER PRIMARY KEY,
        run_id INTEGER NOT NULL,
        game_id INTEGER NOT NULL,
        provider_id INTEGER NOT NULL,
        outcome TEXT NOT NULL,
        american_odds INTEGER NOT NULL,
        decimal_odds TEXT NOT NULL,
        implied_probability TEXT NOT NULL,
        model_probability TEXT NOT NULL,
        edge TEXT NOT NULL,
        risk_level TEXT NOT NULL,
        stake_fraction TEXT,
        created_at TEXT NOT NULL,
        is_active INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_recommendations_active
        ON bet_recommendations (is_active, created_at)",
];

/// SQLite storage adapter
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `database_url`.
    ///
    /// In-memory URLs need `max_connections = 1`: every pooled connection
    /// would otherwise get its own empty database.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Failed to parse database URL: {database_url}"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("Failed to open SQLite database")?;

        info!(max_connections, "Connected to SQLite");
        Ok(Self { pool })
    }

    /// Create any missing tables.
    pub async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to create schema")?;
        }
        debug!("Schema ready");
        Ok(())
    }

    // ==================== Reference data ====================

    pub async fn add_scope(&self, scope: &Scope) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO leagues (code) VALUES (?)")
            .bind(&scope.league)
            .execute(&self.pool)
            .await?;
        sqlx::query("INSERT OR IGNORE INTO market_types (code) VALUES (?)")
            .bind(&scope.market)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn add_game(&self, league: &str, game: &GameInfo) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO games (id, league_code, home_team_id, away_team_id, season, start_time)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(game.game_id)
        .bind(league)
        .bind(game.home_team_id)
        .bind(game.away_team_id)
        .bind(game.season)
        .bind(game.start_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn add_observation(&self, market: &str, obs: &OddsObservation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO odds_observations
                (id, provider_id, game_id, market_code, outcome, snapshot_time, american_odds, decimal_odds)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(obs.id)
        .bind(obs.provider_id)
        .bind(obs.game_id)
        .bind(market)
        .bind(obs.outcome.as_str())
        .bind(obs.snapshot_time)
        .bind(obs.american_odds)
        .bind(obs.decimal_odds.map(|d| d.to_string()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_rating(&self, season: i32, team_id: TeamId, rating: f64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO team_ratings (season, team_id, rating) VALUES (?, ?, ?)
            ON CONFLICT (season, team_id) DO UPDATE SET rating = excluded.rating
            "#,
        )
        .bind(season)
        .bind(team_id)
        .bind(rating)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ==================== Inspection ====================

    pub async fn get_run(&self, run_id: RunId) -> Result<Option<ModelRun>> {
        let row = sqlx::query(
            r#"
            SELECT id, model_id, run_type, league_code, market_code, started_at, finished_at, parameters
            FROM model_runs WHERE id = ?
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<ModelRun> {
            let parameters: String = row.try_get("parameters")?;
            let run_type: String = row.try_get("run_type")?;
            Ok(ModelRun {
                id: row.try_get("id")?,
                model_id: row.try_get("model_id")?,
                run_type: run_type.parse()?,
                scope: Scope::new(
                    row.try_get::<String, _>("league_code")?,
                    row.try_get::<String, _>("market_code")?,
                ),
                started_at: row.try_get("started_at")?,
                finished_at: row.try_get("finished_at")?,
                parameters: serde_json::from_str(&parameters)
                    .context("Failed to parse run parameters")?,
            })
        })
        .transpose()
    }

    /// Recommendations, optionally restricted to active rows, in insertion order.
    pub async fn get_recommendations(&self, active_only: bool) -> Result<Vec<BetRecommendation>> {
        let rows = sqlx::query(
            r#"
            SELECT run_id, game_id, provider_id, outcome, american_odds, decimal_odds,
                   implied_probability, model_probability, edge, risk_level,
                   stake_fraction, created_at, is_active
            FROM bet_recommendations
            WHERE is_active = 1 OR ? = 0
            ORDER BY id
            "#,
        )
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(recommendation_from_row).collect()
    }

    pub async fn count_fair_prices(&self, run_id: RunId) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM model_predictions WHERE run_id = ?")
            .bind(run_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

// ==================== Row mapping ====================

fn parse_decimal(row: &SqliteRow, column: &str) -> Result<Decimal> {
    let raw: String = row.try_get(column)?;
    Decimal::from_str(&raw).with_context(|| format!("Invalid decimal in {column}: {raw}"))
}

fn parse_optional_decimal(row: &SqliteRow, column: &str) -> Result<Option<Decimal>> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|s| Decimal::from_str(&s).with_context(|| format!("Invalid decimal in {column}: {s}")))
        .transpose()
}

fn observation_from_row(row: &SqliteRow) -> Result<OddsObservation> {
    let outcome: String = row.try_get("outcome")?;
    Ok(OddsObservation {
        id: row.try_get("id")?,
        provider_id: row.try_get("provider_id")?,
        game_id: row.try_get("game_id")?,
        outcome: outcome.parse::<Outcome>()?,
        snapshot_time: row.try_get("snapshot_time")?,
        american_odds: row.try_get("american_odds")?,
        decimal_odds: parse_optional_decimal(row, "decimal_odds")?,
    })
}

fn recommendation_from_row(row: &SqliteRow) -> Result<BetRecommendation> {
    let outcome: String = row.try_get("outcome")?;
    let risk_level: String = row.try_get("risk_level")?;
    Ok(BetRecommendation {
        run_id: row.try_get("run_id")?,
        game_id: row.try_get("game_id")?,
        provider_id: row.try_get("provider_id")?,
        outcome: outcome.parse()?,
        american_odds: row.try_get("american_odds")?,
        decimal_odds: parse_decimal(row, "decimal_odds")?,
        implied_probability: parse_decimal(row, "implied_probability")?,
        model_probability: parse_decimal(row, "model_probability")?,
        edge: parse_decimal(row, "edge")?,
        risk_level: risk_level.parse()?,
        stake_fraction: parse_optional_decimal(row, "stake_fraction")?,
        created_at: row.try_get("created_at")?,
        is_active: row.try_get("is_active")?,
    })
}

async fn insert_recommendation<'e, E>(executor: E, rec: &BetRecommendation) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO bet_recommendations
            (run_id, game_id, provider_id, outcome, american_odds, decimal_odds,
             implied_probability, model_probability, edge, risk_level,
             stake_fraction, created_at, is_active)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(rec.run_id)
    .bind(rec.game_id)
    .bind(rec.provider_id)
    .bind(rec.outcome.as_str())
    .bind(rec.american_odds)
    .bind(rec.decimal_odds.to_string())
    .bind(rec.implied_probability.to_string())
    .bind(rec.model_probability.to_string())
    .bind(rec.edge.to_string())
    .bind(rec.risk_level.as_str())
    .bind(rec.stake_fraction.map(|d| d.to_string()))
    .bind(rec.created_at)
    .bind(rec.is_active)
    .execute(executor)
    .await?;
    Ok(())
}

async fn deactivate<'e, E>(executor: E, scope: &Scope, day: NaiveDate) -> Result<u64>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE bet_recommendations
        SET is_active = 0
        WHERE is_active = 1
          AND substr(created_at, 1, 10) = ?
          AND run_id IN (
              SELECT id FROM model_runs WHERE league_code = ? AND market_code = ?
          )
        "#,
    )
    .bind(day.format("%Y-%m-%d").to_string())
    .bind(&scope.league)
    .bind(&scope.market)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

#[async_trait]
impl OddsStore for SqliteStore {
    async fn scope_exists(&self, scope: &Scope) -> Result<bool> {
        let found: i64 = sqlx::query_scalar(
            r#"
            SELECT (SELECT COUNT(*) FROM leagues WHERE code = ?)
                 * (SELECT COUNT(*) FROM market_types WHERE code = ?)
            "#,
        )
        .bind(&scope.league)
        .bind(&scope.market)
        .fetch_one(&self.pool)
        .await?;
        Ok(found > 0)
    }

    #[instrument(skip(self))]
    async fn load_observations(
        &self,
        scope: &Scope,
        since: DateTime<Utc>,
    ) -> Result<Vec<OddsObservation>> {
        let rows = sqlx::query(
            r#"
            SELECT o.id, o.provider_id, o.game_id, o.outcome, o.snapshot_time,
                   o.american_odds, o.decimal_odds
            FROM odds_observations o
            JOIN games g ON g.id = o.game_id
            WHERE g.league_code = ? AND o.market_code = ? AND o.snapshot_time >= ?
            ORDER BY o.id
            "#,
        )
        .bind(&scope.league)
        .bind(&scope.market)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let observations = rows
            .iter()
            .map(observation_from_row)
            .collect::<Result<Vec<_>>>()?;
        debug!(count = observations.len(), "Observations loaded");
        Ok(observations)
    }

    async fn load_team_ratings(&self, season: i32) -> Result<HashMap<TeamId, f64>> {
        let rows = sqlx::query("SELECT team_id, rating FROM team_ratings WHERE season = ?")
            .bind(season)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| -> Result<(TeamId, f64)> {
                Ok((row.try_get("team_id")?, row.try_get("rating")?))
            })
            .collect()
    }

    async fn load_games(&self, scope: &Scope) -> Result<Vec<GameInfo>> {
        let rows = sqlx::query(
            r#"
            SELECT id, home_team_id, away_team_id, season, start_time
            FROM games WHERE league_code = ?
            ORDER BY id
            "#,
        )
        .bind(&scope.league)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<GameInfo> {
                Ok(GameInfo {
                    game_id: row.try_get("id")?,
                    home_team_id: row.try_get("home_team_id")?,
                    away_team_id: row.try_get("away_team_id")?,
                    season: row.try_get("season")?,
                    start_time: row.try_get("start_time")?,
                })
            })
            .collect()
    }

    async fn load_or_create_model(&self, identity: &ModelIdentity) -> Result<ModelId> {
        sqlx::query("INSERT OR IGNORE INTO models (name, version, type_code) VALUES (?, ?, ?)")
            .bind(&identity.name)
            .bind(&identity.version)
            .bind(&identity.type_code)
            .execute(&self.pool)
            .await?;
        let id: i64 = sqlx::query_scalar("SELECT id FROM models WHERE name = ? AND version = ?")
            .bind(&identity.name)
            .bind(&identity.version)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    async fn create_run(
        &self,
        model_id: ModelId,
        run_type: RunType,
        scope: &Scope,
        parameters: &RunParameters,
        started_at: DateTime<Utc>,
    ) -> Result<RunId> {
        let parameters = serde_json::to_string(parameters).context("Failed to encode run parameters")?;
        let result = sqlx::query(
            r#"
            INSERT INTO model_runs (model_id, run_type, league_code, market_code, started_at, parameters)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(model_id)
        .bind(run_type.as_str())
        .bind(&scope.league)
        .bind(&scope.market)
        .bind(started_at)
        .bind(parameters)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn finalize_run(&self, run_id: RunId, finished_at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE model_runs SET finished_at = ? WHERE id = ? AND finished_at IS NULL",
        )
        .bind(finished_at)
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() != 1 {
            return Err(anyhow!("run {run_id} missing or already finalized"));
        }
        Ok(())
    }

    async fn deactivate_recommendations(&self, scope: &Scope, day: NaiveDate) -> Result<u64> {
        deactivate(&self.pool, scope, day).await
    }

    async fn insert_recommendations(&self, recommendations: &[BetRecommendation]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for rec in recommendations {
            insert_recommendation(&mut *tx, rec).await?;
        }
        tx.commit().await?;
        debug!("Inserted {} recommendations", recommendations.len());
        Ok(())
    }

    async fn insert_fair_prices(&self, run_id: RunId, prices: &[FairPrice]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for price in prices {
            sqlx::query(
                r#"
                INSERT INTO model_predictions
                    (run_id, game_id, provider_id, outcome, probability, decimal_odds)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(run_id)
            .bind(price.game_id)
            .bind(price.provider_id)
            .bind(price.outcome.as_str())
            .bind(price.probability.to_string())
            .bind(price.decimal_odds.to_string())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Deactivate and insert inside one transaction.
    async fn replace_recommendations(
        &self,
        scope: &Scope,
        day: NaiveDate,
        recommendations: &[BetRecommendation],
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let deactivated = deactivate(&mut *tx, scope, day).await?;
        for rec in recommendations {
            insert_recommendation(&mut *tx, rec).await?;
        }
        tx.commit().await?;
        debug!(deactivated, inserted = recommendations.len(), "Recommendations replaced");
        Ok(deactivated)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Persistence layer.
//!
//! Defines the `OddsStore` trait the engine reads reference data and odds
//! from and writes runs, fair prices and recommendations to. Two
//! implementations: an in-memory store and a SQLite store.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};

use crate::types::{
    BetRecommendation, FairPrice, GameInfo, ModelId, ModelIdentity, OddsObservation, RunId,
    RunType, Scope, TeamId,
};

/// Opaque run parameters recorded with a `ModelRun`.
pub type RunParameters = BTreeMap<String, serde_json::Value>;

/// Data store collaborator.
///
/// Observations, games, teams and ratings are owned by the store and only
/// read. Runs, fair prices and recommendations are written by the engine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OddsStore: Send + Sync {
    /// Whether the league and market type of `scope` are known.
    async fn scope_exists(&self, scope: &Scope) -> Result<bool>;

    /// Every observation for games in `scope` taken at or after `since`.
    async fn load_observations(
        &self,
        scope: &Scope,
        since: DateTime<Utc>,
    ) -> Result<Vec<OddsObservation>>;

    /// Team ratings for a season.
    async fn load_team_ratings(&self, season: i32) -> Result<HashMap<TeamId, f64>>;

    /// Games in `scope`.
    async fn load_games(&self, scope: &Scope) -> Result<Vec<GameInfo>>;

    /// Look up a model by name and version, registering it if absent.
    async fn load_or_create_model(&self, identity: &ModelIdentity) -> Result<ModelId>;

    async fn create_run(
        &self,
        model_id: ModelId,
        run_type: RunType,
        scope: &Scope,
        parameters: &RunParameters,
        started_at: DateTime<Utc>,
    ) -> Result<RunId>;

    async fn finalize_run(&self, run_id: RunId, finished_at: DateTime<Utc>) -> Result<()>;

    /// Mark every active recommendation for `scope` created on `day` inactive.
    /// Returns the number of rows touched.
    async fn deactivate_recommendations(&self, scope: &Scope, day: NaiveDate) -> Result<u64>;

    async fn insert_recommendations(&self, recommendations: &[BetRecommendation]) -> Result<()>;

    /// Audit trail of the fair prices a run produced.
    async fn insert_fair_prices(&self, run_id: RunId, prices: &[FairPrice]) -> Result<()>;

    /// Deactivate the day's previous batch, then insert the new one.
    ///
    /// Stores that support transactions should override this so readers
    /// never observe two active batches.
    async fn replace_recommendations(
        &self,
        scope: &Scope,
        day: NaiveDate,
        recommendations: &[BetRecommendation],
    ) -> Result<u64> {
        let deactivated = self.deactivate_recommendations(scope, day).await?;
        self.insert_recommendations(recommendations).await?;
        Ok(deactivated)
    }
}

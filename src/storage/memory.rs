//! In-memory store.
//!
//! Deterministic `OddsStore` for tests and dry runs. All state lives behind
//! a mutex; any operation can be forced to fail to exercise the engine's
//! failure paths.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{OddsStore, RunParameters};
use crate::types::{
    BetRecommendation, FairPrice, GameInfo, ModelId, ModelIdentity, ModelRun, OddsObservation,
    RunId, RunType, Scope, TeamId,
};

#[derive(Debug, Default)]
struct MemoryState {
    scopes: HashSet<Scope>,
    games: Vec<(Scope, GameInfo)>,
    observations: Vec<(Scope, OddsObservation)>,
    ratings: HashMap<i32, HashMap<TeamId, f64>>,
    models: Vec<(ModelId, ModelIdentity)>,
    runs: Vec<ModelRun>,
    recommendations: Vec<BetRecommendation>,
    fair_prices: Vec<(RunId, FairPrice)>,
    /// Operation name that should fail, if any.
    fail_on: Option<String>,
}

impl MemoryState {
    fn check(&self, operation: &str) -> Result<()> {
        match &self.fail_on {
            Some(op) if op == operation => Err(anyhow!("forced failure in {operation}")),
            _ => Ok(()),
        }
    }

    fn run_scope(&self, run_id: RunId) -> Option<&Scope> {
        self.runs.iter().find(|r| r.id == run_id).map(|r| &r.scope)
    }

    fn deactivate(&mut self, scope: &Scope, day: NaiveDate) -> u64 {
        let hits: Vec<bool> = self
            .recommendations
            .iter()
            .map(|r| {
                r.is_active
                    && r.created_at.date_naive() == day
                    && self.run_scope(r.run_id) == Some(scope)
            })
            .collect();
        let mut deactivated = 0;
        for (rec, hit) in self.recommendations.iter_mut().zip(hits) {
            if hit {
                rec.is_active = false;
                deactivated += 1;
            }
        }
        deactivated
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -- Seeding --

    pub fn add_scope(&self, scope: Scope) {
        self.state().scopes.insert(scope);
    }

    pub fn add_game(&self, scope: &Scope, game: GameInfo) {
        self.state().games.push((scope.clone(), game));
    }

    pub fn add_observation(&self, scope: &Scope, observation: OddsObservation) {
        self.state().observations.push((scope.clone(), observation));
    }

    pub fn set_rating(&self, season: i32, team_id: TeamId, rating: f64) {
        self.state()
            .ratings
            .entry(season)
            .or_default()
            .insert(team_id, rating);
    }

    /// Make every subsequent call to `operation` fail.
    pub fn fail_on(&self, operation: &str) {
        self.state().fail_on = Some(operation.to_string());
    }

    pub fn clear_failure(&self) {
        self.state().fail_on = None;
    }

    // -- Inspection --

    pub fn runs(&self) -> Vec<ModelRun> {
        self.state().runs.clone()
    }

    pub fn recommendations(&self) -> Vec<BetRecommendation> {
        self.state().recommendations.clone()
    }

    pub fn active_recommendations(&self) -> Vec<BetRecommendation> {
        self.state()
            .recommendations
            .iter()
            .filter(|r| r.is_active)
            .cloned()
            .collect()
    }

    pub fn fair_prices(&self, run_id: RunId) -> Vec<FairPrice> {
        self.state()
            .fair_prices
            .iter()
            .filter(|(id, _)| *id == run_id)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn models(&self) -> Vec<(ModelId, ModelIdentity)> {
        self.state().models.clone()
    }
}

#[async_trait]
impl OddsStore for MemoryStore {
    async fn scope_exists(&self, scope: &Scope) -> Result<bool> {
        let state = self.state();
        state.check("scope_exists")?;
        Ok(state.scopes.contains(scope))
    }

    async fn load_observations(
        &self,
        scope: &Scope,
        since: DateTime<Utc>,
    ) -> Result<Vec<OddsObservation>> {
        let state = self.state();
        state.check("load_observations")?;
        Ok(state
            .observations
            .iter()
            .filter(|(s, o)| s == scope && o.snapshot_time >= since)
            .map(|(_, o)| o.clone())
            .collect())
    }

    async fn load_team_ratings(&self, season: i32) -> Result<HashMap<TeamId, f64>> {
        let state = self.state();
        state.check("load_team_ratings")?;
        Ok(state.ratings.get(&season).cloned().unwrap_or_default())
    }

    async fn load_games(&self, scope: &Scope) -> Result<Vec<GameInfo>> {
        let state = self.state();
        state.check("load_games")?;
        Ok(state
            .games
            .iter()
            .filter(|(s, _)| s == scope)
            .map(|(_, g)| g.clone())
            .collect())
    }

    async fn load_or_create_model(&self, identity: &ModelIdentity) -> Result<ModelId> {
        let mut state = self.state();
        state.check("load_or_create_model")?;
        if let Some((id, _)) = state
            .models
            .iter()
            .find(|(_, m)| m.name == identity.name && m.version == identity.version)
        {
            return Ok(*id);
        }
        let id = state.models.len() as ModelId + 1;
        state.models.push((id, identity.clone()));
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
        let mut state = self.state();
        state.check("create_run")?;
        let id = state.runs.len() as RunId + 1;
        state.runs.push(ModelRun {
            id,
            model_id,
            run_type,
            scope: scope.clone(),
            started_at,
            finished_at: None,
            parameters: parameters.clone(),
        });
        Ok(id)
    }

    async fn finalize_run(&self, run_id: RunId, finished_at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state();
        state.check("finalize_run")?;
        let run = state
            .runs
            .iter_mut()
            .find(|r| r.id == run_id)
            .ok_or_else(|| anyhow!("run {run_id} not found"))?;
        if run.finished_at.is_some() {
            return Err(anyhow!("run {run_id} already finalized"));
        }
        run.finished_at = Some(finished_at);
        Ok(())
    }

    async fn deactivate_recommendations(&self, scope: &Scope, day: NaiveDate) -> Result<u64> {
        let mut state = self.state();
        state.check("deactivate_recommendations")?;
        Ok(state.deactivate(scope, day))
    }

    async fn insert_recommendations(&self, recommendations: &[BetRecommendation]) -> Result<()> {
        let mut state = self.state();
        state.check("insert_recommendations")?;
        state.recommendations.extend_from_slice(recommendations);
        Ok(())
    }

    async fn insert_fair_prices(&self, run_id: RunId, prices: &[FairPrice]) -> Result<()> {
        let mut state = self.state();
        state.check("insert_fair_prices")?;
        state
            .fair_prices
            .extend(prices.iter().map(|p| (run_id, p.clone())));
        Ok(())
    }

    /// Both steps happen under one lock, so no reader sees a half-swapped batch.
    async fn replace_recommendations(
        &self,
        scope: &Scope,
        day: NaiveDate,
        recommendations: &[BetRecommendation],
    ) -> Result<u64> {
        let mut state = self.state();
        state.check("deactivate_recommendations")?;
        state.check("insert_recommendations")?;
        let deactivated = state.deactivate(scope, day);
        state.recommendations.extend_from_slice(recommendations);
        Ok(deactivated)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Outcome, RiskLevel};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn scope() -> Scope {
        Scope::new("NBA", "moneyline")
    }

    fn rec(run_id: RunId, at: DateTime<Utc>) -> BetRecommendation {
        BetRecommendation {
            run_id,
            game_id: 1,
            provider_id: 1,
            outcome: Outcome::Home,
            american_odds: 110,
            decimal_odds: dec!(2.1),
            implied_probability: dec!(0.4762),
            model_probability: dec!(0.5),
            edge: dec!(0.05),
            risk_level: RiskLevel::Medium,
            stake_fraction: None,
            created_at: at,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn test_model_identity_is_idempotent() {
        let store = MemoryStore::new();
        let identity = ModelIdentity {
            name: "elo".to_string(),
            version: "1.0".to_string(),
            type_code: "RATING".to_string(),
        };
        let a = store.load_or_create_model(&identity).await.unwrap();
        let b = store.load_or_create_model(&identity).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.models().len(), 1);
    }

    #[tokio::test]
    async fn test_finalize_run_only_once() {
        let store = MemoryStore::new();
        let id = store
            .create_run(1, RunType::Manual, &scope(), &RunParameters::new(), Utc::now())
            .await
            .unwrap();
        store.finalize_run(id, Utc::now()).await.unwrap();
        assert!(store.finalize_run(id, Utc::now()).await.is_err());
        assert!(store.runs()[0].is_complete());
    }

    #[tokio::test]
    async fn test_deactivate_only_same_scope_and_day() {
        let store = MemoryStore::new();
        let day1 = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let day2 = Utc.with_ymd_and_hms(2024, 3, 2, 10, 0, 0).unwrap();
        let other = Scope::new("NHL", "moneyline");

        let r1 = store
            .create_run(1, RunType::Manual, &scope(), &RunParameters::new(), day1)
            .await
            .unwrap();
        let r2 = store
            .create_run(1, RunType::Manual, &other, &RunParameters::new(), day1)
            .await
            .unwrap();
        store
            .insert_recommendations(&[rec(r1, day1), rec(r1, day2), rec(r2, day1)])
            .await
            .unwrap();

        let n = store
            .deactivate_recommendations(&scope(), day1.date_naive())
            .await
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(store.active_recommendations().len(), 2);
    }

    #[tokio::test]
    async fn test_forced_failure() {
        let store = MemoryStore::new();
        store.fail_on("load_games");
        assert!(store.load_games(&scope()).await.is_err());
        store.clear_failure();
        assert!(store.load_games(&scope()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_observation_window() {
        let store = MemoryStore::new();
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        for (id, hours) in [(1, 0), (2, 5), (3, 10)] {
            store.add_observation(
                &scope(),
                OddsObservation {
                    id,
                    provider_id: 1,
                    game_id: 1,
                    outcome: Outcome::Home,
                    snapshot_time: t0 + chrono::Duration::hours(hours),
                    american_odds: Some(120),
                    decimal_odds: None,
                },
            );
        }
        let loaded = store
            .load_observations(&scope(), t0 + chrono::Duration::hours(5))
            .await
            .unwrap();
        let ids: Vec<_> = loaded.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![2, 3]);
    }
}

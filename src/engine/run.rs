//! Run orchestrator.
//!
//! Owns the lifecycle of a model run:
//! `Created → Loading → Modeling → Scoring → Finalizing → Completed`, with
//! `Failed` reachable from every stage. A failed run keeps
//! `finished_at = NULL` in the store and is never retried here.
//!
//! Running two orchestrators against the same scope and day at the same
//! time is unsupported and can leave two active batches.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tracing::{debug, error, info, warn};

use super::resolver;
use crate::storage::{OddsStore, RunParameters};
use crate::strategy::edge;
use crate::strategy::{build_model, ModelSpec, ProbabilityModel};
use crate::types::{
    BetRecommendation, EngineError, FairPrice, FairPriceBook, GameInfo, GameLines, ModelIdentity,
    RunId, RunType, Scope,
};

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Created,
    Loading,
    Modeling,
    Scoring,
    Finalizing,
    Completed,
    Failed,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStage::Created => "created",
            RunStage::Loading => "loading",
            RunStage::Modeling => "modeling",
            RunStage::Scoring => "scoring",
            RunStage::Finalizing => "finalizing",
            RunStage::Completed => "completed",
            RunStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Tallies accumulated over a run. Recoverable skips are counted here
/// instead of aborting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunCounters {
    pub observations_loaded: usize,
    pub observations_superseded: usize,
    pub games_seen: usize,
    pub games_scored: usize,
    pub games_without_reference: usize,
    pub invalid_odds: usize,
    pub degenerate_probabilities: usize,
    pub no_market: usize,
    pub fair_prices: usize,
    pub recommendations: usize,
    pub deactivated: u64,
}

impl RunCounters {
    /// Count a recoverable error. Returns the error back if it is fatal.
    fn absorb(&mut self, err: EngineError) -> Result<(), EngineError> {
        if !err.is_recoverable() {
            return Err(err);
        }
        match err {
            EngineError::InvalidOdds(_) => self.invalid_odds += 1,
            EngineError::DegenerateProbability { .. } => self.degenerate_probabilities += 1,
            _ => self.no_market += 1,
        }
        Ok(())
    }
}

/// Explicit per-run state threaded through every stage.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: RunId,
    pub scope: Scope,
    pub started_at: DateTime<Utc>,
    /// Calendar day (UTC) recommendations are superseded within.
    pub day: NaiveDate,
    pub finished_at: Option<DateTime<Utc>>,
    pub stage: RunStage,
    pub counters: RunCounters,
}

impl RunContext {
    fn new(run_id: RunId, scope: Scope, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            scope,
            started_at,
            day: started_at.date_naive(),
            finished_at: None,
            stage: RunStage::Created,
            counters: RunCounters::default(),
        }
    }

    fn advance(&mut self, next: RunStage) {
        debug!(run_id = self.run_id, from = %self.stage, to = %next, "Run stage");
        self.stage = next;
    }
}

/// What to run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub scope: Scope,
    pub run_type: RunType,
    /// Observations older than `now - lookback` are ignored.
    pub lookback: Duration,
    pub model: ModelSpec,
}

impl RunRequest {
    /// Parameters recorded on the `ModelRun` row.
    pub fn parameters(&self) -> RunParameters {
        let mut params = RunParameters::new();
        params.insert("league".to_string(), json!(self.scope.league));
        params.insert("market".to_string(), json!(self.scope.market));
        params.insert("lookback_hours".to_string(), json!(self.lookback.num_hours()));
        if let ModelSpec::Elo {
            season,
            default_rating,
            ..
        } = &self.model
        {
            params.insert("season".to_string(), json!(season));
            params.insert("default_rating".to_string(), json!(default_rating));
        }
        params
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: RunId,
    pub model: ModelIdentity,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stage: RunStage,
    pub counters: RunCounters,
    /// Ranked best edge first.
    pub recommendations: Vec<BetRecommendation>,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.counters;
        write!(
            f,
            "Run #{} [{} {}]: observations={} games={}/{} fair_prices={} recommendations={} deactivated={} skipped(invalid={} degenerate={} no_market={} unknown_game={})",
            self.run_id,
            self.model.name,
            self.model.version,
            c.observations_loaded,
            c.games_scored,
            c.games_seen,
            c.fair_prices,
            c.recommendations,
            c.deactivated,
            c.invalid_odds,
            c.degenerate_probabilities,
            c.no_market,
            c.games_without_reference,
        )
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Drives resolution → modeling → scoring → persistence for one scope.
pub struct RunOrchestrator<S: OddsStore> {
    store: S,
}

impl<S: OddsStore> RunOrchestrator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Execute one run starting now.
    pub async fn run(&self, request: &RunRequest) -> Result<RunReport, EngineError> {
        self.run_at(request, Utc::now()).await
    }

    /// Execute one run as if started at `now`.
    pub async fn run_at(
        &self,
        request: &RunRequest,
        now: DateTime<Utc>,
    ) -> Result<RunReport, EngineError> {
        self.resolve_scope(&request.scope).await?;

        let identity = request.model.identity();
        let model_id = self
            .store
            .load_or_create_model(&identity)
            .await
            .map_err(|e| EngineError::persistence("load_or_create_model", e))?;

        let run_id = self
            .store
            .create_run(
                model_id,
                request.run_type,
                &request.scope,
                &request.parameters(),
                now,
            )
            .await
            .map_err(|e| EngineError::persistence("create_run", e))?;

        let mut ctx = RunContext::new(run_id, request.scope.clone(), now);
        info!(
            run_id,
            model = %identity.name,
            version = %identity.version,
            scope = %ctx.scope,
            run_type = %request.run_type,
            "Run started"
        );

        match self.execute(&mut ctx, request).await {
            Ok(recommendations) => {
                let finished_at = ctx.finished_at.unwrap_or(now);
                ctx.advance(RunStage::Completed);
                let report = RunReport {
                    run_id,
                    model: identity,
                    started_at: now,
                    finished_at,
                    stage: ctx.stage,
                    counters: ctx.counters,
                    recommendations,
                };
                info!(
                    run_id,
                    observations = report.counters.observations_loaded,
                    recommendations = report.counters.recommendations,
                    deactivated = report.counters.deactivated,
                    invalid_odds = report.counters.invalid_odds,
                    degenerate = report.counters.degenerate_probabilities,
                    no_market = report.counters.no_market,
                    "Run complete"
                );
                Ok(report)
            }
            Err(e) => {
                let failed_in = ctx.stage;
                ctx.advance(RunStage::Failed);
                error!(run_id, stage = %failed_in, error = %e, "Run failed, left unfinalized");
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        ctx: &mut RunContext,
        request: &RunRequest,
    ) -> Result<Vec<BetRecommendation>, EngineError> {
        // -- Loading ---------------------------------------------------------
        ctx.advance(RunStage::Loading);
        let games = self
            .store
            .load_games(&ctx.scope)
            .await
            .map_err(|e| EngineError::persistence("load_games", e))?;
        let model = self.prepare_model(&request.model, &games).await?;

        let since = ctx.started_at - request.lookback;
        let observations = self
            .store
            .load_observations(&ctx.scope, since)
            .await
            .map_err(|e| EngineError::persistence("load_observations", e))?;
        ctx.counters.observations_loaded = observations.len();
        info!(run_id = ctx.run_id, count = observations.len(), since = %since, "Observations loaded");

        if observations.is_empty() {
            ctx.advance(RunStage::Finalizing);
            self.finalize(ctx).await?;
            return Ok(Vec::new());
        }

        // -- Modeling --------------------------------------------------------
        ctx.advance(RunStage::Modeling);
        let resolution = resolver::resolve(&observations);
        ctx.counters.invalid_odds += resolution.invalid_odds;
        ctx.counters.observations_superseded = resolution.superseded;
        ctx.counters.games_seen = resolution.games.len();

        let games: HashMap<_, _> = games.into_iter().map(|g| (g.game_id, g)).collect();
        let mut priced: Vec<(GameLines, FairPriceBook)> = Vec::new();
        for (game_id, lines) in resolution.games {
            let game = games.get(&game_id);
            if game.is_none() {
                ctx.counters.games_without_reference += 1;
                if model.requires_game_info() {
                    debug!(run_id = ctx.run_id, game_id, "No reference data for game, skipped");
                    continue;
                }
            }
            match model.compute_fair_prices(&lines, game) {
                Ok(book) => {
                    ctx.counters.fair_prices += book.len();
                    priced.push((lines, book));
                }
                Err(e) => ctx.counters.absorb(e)?,
            }
        }

        // -- Scoring ---------------------------------------------------------
        ctx.advance(RunStage::Scoring);
        let mut recommendations = Vec::new();
        for (lines, book) in &priced {
            let mut scored_any = false;
            for result in edge::score_game(ctx.run_id, lines, book, ctx.started_at) {
                match result {
                    Ok(rec) => {
                        scored_any = true;
                        recommendations.push(rec);
                    }
                    Err(e) => ctx.counters.absorb(e)?,
                }
            }
            if scored_any {
                ctx.counters.games_scored += 1;
            }
        }
        edge::rank(&mut recommendations);
        ctx.counters.recommendations = recommendations.len();

        // -- Finalizing ------------------------------------------------------
        ctx.advance(RunStage::Finalizing);
        let fair_prices: Vec<FairPrice> = priced
            .iter()
            .flat_map(|(_, book)| book.iter().cloned())
            .collect();
        self.store
            .insert_fair_prices(ctx.run_id, &fair_prices)
            .await
            .map_err(|e| EngineError::persistence("insert_fair_prices", e))?;

        ctx.counters.deactivated = self
            .store
            .replace_recommendations(&ctx.scope, ctx.day, &recommendations)
            .await
            .map_err(|e| EngineError::persistence("replace_recommendations", e))?;

        self.finalize(ctx).await?;
        Ok(recommendations)
    }

    async fn finalize(&self, ctx: &mut RunContext) -> Result<(), EngineError> {
        let finished_at = Utc::now().max(ctx.started_at);
        self.store
            .finalize_run(ctx.run_id, finished_at)
            .await
            .map_err(|e| EngineError::persistence("finalize_run", e))?;
        ctx.finished_at = Some(finished_at);
        Ok(())
    }

    /// Configuration problems abort before any run row exists.
    pub async fn resolve_scope(&self, scope: &Scope) -> Result<(), EngineError> {
        let exists = self
            .store
            .scope_exists(scope)
            .await
            .map_err(|e| EngineError::persistence("scope_exists", e))?;
        if exists {
            Ok(())
        } else {
            Err(EngineError::ConfigurationMissing(format!(
                "league/market {scope} not found"
            )))
        }
    }

    /// Build the selected model and load whatever context it needs.
    async fn prepare_model(
        &self,
        spec: &ModelSpec,
        games: &[GameInfo],
    ) -> Result<Box<dyn ProbabilityModel>, EngineError> {
        let mut ratings = HashMap::new();
        if let ModelSpec::Elo {
            season,
            default_rating,
            ..
        } = spec
        {
            let seasons: BTreeSet<i32> = match season {
                Some(s) => BTreeSet::from([*s]),
                None => games.iter().map(|g| g.season).collect(),
            };
            for s in seasons {
                let table = self
                    .store
                    .load_team_ratings(s)
                    .await
                    .map_err(|e| EngineError::persistence("load_team_ratings", e))?;
                if table.is_empty() {
                    warn!(season = s, default_rating, "No team ratings, using default for all teams");
                }
                ratings.insert(s, table);
            }
        }
        Ok(build_model(spec, ratings))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

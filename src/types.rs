//! Shared types for the ODDSEDGE value engine.
//!
//! Raw odds observations and reference data come from the store and are
//! never mutated here. Fair prices, model runs and bet recommendations are
//! produced by the engine and written back through the store.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub type GameId = i64;
pub type ProviderId = i64;
pub type TeamId = i64;
pub type ModelId = i64;
pub type RunId = i64;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Side of a game a price is quoted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Home,
    Away,
    Draw,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Home => "HOME",
            Outcome::Away => "AWAY",
            Outcome::Draw => "DRAW",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Outcome {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "HOME" | "H" | "1" => Ok(Outcome::Home),
            "AWAY" | "A" | "2" => Ok(Outcome::Away),
            "DRAW" | "D" | "X" => Ok(Outcome::Draw),
            _ => Err(anyhow::anyhow!("Unknown outcome: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Observations and resolved lines
// ---------------------------------------------------------------------------

/// One odds quote from one provider at one point in time.
/// At least one of `american_odds` / `decimal_odds` is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsObservation {
    pub id: i64,
    pub provider_id: ProviderId,
    pub game_id: GameId,
    pub outcome: Outcome,
    pub snapshot_time: DateTime<Utc>,
    pub american_odds: Option<i32>,
    pub decimal_odds: Option<Decimal>,
}

/// A validated price for one side, taken from the latest observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinePrice {
    pub observation_id: i64,
    pub decimal_odds: Decimal,
    pub american_odds: i32,
    pub snapshot_time: DateTime<Utc>,
}

/// Latest prices one provider quotes for one game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedLine {
    pub game_id: GameId,
    pub provider_id: ProviderId,
    pub prices: BTreeMap<Outcome, LinePrice>,
}

impl ResolvedLine {
    pub fn new(game_id: GameId, provider_id: ProviderId) -> Self {
        Self {
            game_id,
            provider_id,
            prices: BTreeMap::new(),
        }
    }

    pub fn price(&self, outcome: Outcome) -> Option<&LinePrice> {
        self.prices.get(&outcome)
    }
}

/// All resolved provider lines for a single game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameLines {
    pub game_id: GameId,
    pub lines: BTreeMap<ProviderId, ResolvedLine>,
}

impl GameLines {
    pub fn new(game_id: GameId) -> Self {
        Self {
            game_id,
            lines: BTreeMap::new(),
        }
    }

    /// Number of providers with at least one priced side.
    pub fn provider_count(&self) -> usize {
        self.lines.len()
    }

    /// Every provider quote for `outcome`, in provider id order.
    pub fn quotes(&self, outcome: Outcome) -> impl Iterator<Item = (ProviderId, &LinePrice)> {
        self.lines
            .iter()
            .filter_map(move |(provider_id, line)| line.price(outcome).map(|p| (*provider_id, p)))
    }
}

// ---------------------------------------------------------------------------
// Reference data
// ---------------------------------------------------------------------------

/// Game reference data needed by the rating-based model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameInfo {
    pub game_id: GameId,
    pub home_team_id: TeamId,
    pub away_team_id: TeamId,
    pub season: i32,
    pub start_time: DateTime<Utc>,
}

/// League + market filter a run operates on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub league: String,
    pub market: String,
}

impl Scope {
    pub fn new(league: impl Into<String>, market: impl Into<String>) -> Self {
        Self {
            league: league.into(),
            market: market.into(),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.league, self.market)
    }
}

// ---------------------------------------------------------------------------
// Fair prices
// ---------------------------------------------------------------------------

/// Model-derived price for one side of a game.
///
/// `provider_id` is set when the price is a per-provider view (market
/// consensus with that provider excluded) and `None` for a game-wide price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FairPrice {
    pub game_id: GameId,
    pub outcome: Outcome,
    pub provider_id: Option<ProviderId>,
    pub probability: Decimal,
    pub decimal_odds: Decimal,
}

impl FairPrice {
    /// Build from a win probability. Fails unless `0 < p < 1`.
    pub fn from_probability(
        game_id: GameId,
        outcome: Outcome,
        provider_id: Option<ProviderId>,
        probability: Decimal,
    ) -> Result<Self, EngineError> {
        if probability <= Decimal::ZERO || probability >= Decimal::ONE {
            return Err(EngineError::DegenerateProbability {
                game_id,
                outcome,
                probability,
            });
        }
        Ok(Self {
            game_id,
            outcome,
            provider_id,
            probability,
            decimal_odds: Decimal::ONE / probability,
        })
    }

    /// Build from a fair decimal price. Fails unless the price is above 1.
    pub fn from_decimal(
        game_id: GameId,
        outcome: Outcome,
        provider_id: Option<ProviderId>,
        decimal_odds: Decimal,
    ) -> Result<Self, EngineError> {
        if decimal_odds <= Decimal::ONE {
            let probability = if decimal_odds > Decimal::ZERO {
                Decimal::ONE / decimal_odds
            } else {
                Decimal::ZERO
            };
            return Err(EngineError::DegenerateProbability {
                game_id,
                outcome,
                probability,
            });
        }
        Ok(Self {
            game_id,
            outcome,
            provider_id,
            probability: Decimal::ONE / decimal_odds,
            decimal_odds,
        })
    }
}

/// Fair prices produced for one game by one model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FairPriceBook {
    shared: BTreeMap<Outcome, FairPrice>,
    per_provider: BTreeMap<(ProviderId, Outcome), FairPrice>,
}

impl FairPriceBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, price: FairPrice) {
        match price.provider_id {
            Some(provider_id) => {
                self.per_provider.insert((provider_id, price.outcome), price);
            }
            None => {
                self.shared.insert(price.outcome, price);
            }
        }
    }

    /// Price governing `provider`'s quote on `outcome`. A per-provider price
    /// takes precedence over a game-wide one.
    pub fn lookup(&self, provider_id: ProviderId, outcome: Outcome) -> Option<&FairPrice> {
        self.per_provider
            .get(&(provider_id, outcome))
            .or_else(|| self.shared.get(&outcome))
    }

    pub fn iter(&self) -> impl Iterator<Item = &FairPrice> {
        self.shared.values().chain(self.per_provider.values())
    }

    pub fn len(&self) -> usize {
        self.shared.len() + self.per_provider.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Model runs
// ---------------------------------------------------------------------------

/// How a run was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunType {
    Scheduled,
    Manual,
}

impl RunType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunType::Scheduled => "scheduled",
            RunType::Manual => "manual",
        }
    }
}

impl fmt::Display for RunType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "scheduled" => Ok(RunType::Scheduled),
            "manual" => Ok(RunType::Manual),
            _ => Err(anyhow::anyhow!("Unknown run type: {s}")),
        }
    }
}

/// Identity a model registers under in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelIdentity {
    pub name: String,
    pub version: String,
    pub type_code: String,
}

/// One execution of the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRun {
    pub id: RunId,
    pub model_id: ModelId,
    pub run_type: RunType,
    pub scope: Scope,
    pub started_at: DateTime<Utc>,
    /// Stamped once on successful completion; `None` marks an incomplete run.
    pub finished_at: Option<DateTime<Utc>>,
    pub parameters: BTreeMap<String, serde_json::Value>,
}

impl ModelRun {
    pub fn is_complete(&self) -> bool {
        self.finished_at.is_some()
    }
}

// ---------------------------------------------------------------------------
// Recommendations
// ---------------------------------------------------------------------------

/// Discrete risk tier for an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    High,
    Medium,
    Low,
    Negative,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::High => "High",
            RiskLevel::Medium => "Medium",
            RiskLevel::Low => "Low",
            RiskLevel::Negative => "Negative",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "high" => Ok(RiskLevel::High),
            "medium" => Ok(RiskLevel::Medium),
            "low" => Ok(RiskLevel::Low),
            "negative" => Ok(RiskLevel::Negative),
            _ => Err(anyhow::anyhow!("Unknown risk level: {s}")),
        }
    }
}

/// Scored provider quote emitted by a run. Append-only: only `is_active`
/// ever changes after insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetRecommendation {
    pub run_id: RunId,
    pub game_id: GameId,
    pub provider_id: ProviderId,
    pub outcome: Outcome,
    pub american_odds: i32,
    /// Provider's decimal price the edge was computed from.
    pub decimal_odds: Decimal,
    /// `1 / decimal_odds`
    pub implied_probability: Decimal,
    pub model_probability: Decimal,
    /// `decimal_odds / fair_decimal - 1`
    pub edge: Decimal,
    pub risk_level: RiskLevel,
    /// Reserved for position sizing; never populated by the engine.
    pub stake_fraction: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

impl fmt::Display for BetRecommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let american = if self.american_odds > 0 {
            format!("+{}", self.american_odds)
        } else {
            self.american_odds.to_string()
        };
        write!(
            f,
            "game={} provider={} {} {american} ({:.3}) | implied={:.1}% model={:.1}% edge={:+.2}% [{}]",
            self.game_id,
            self.provider_id,
            self.outcome,
            self.decimal_odds,
            self.implied_probability * Decimal::ONE_HUNDRED,
            self.model_probability * Decimal::ONE_HUNDRED,
            self.edge * Decimal::ONE_HUNDRED,
            self.risk_level,
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for the value engine.
///
/// `InvalidOdds`, `DegenerateProbability` and `NoMarketToCompare` are
/// absorbed per pairing; the other two abort a run.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),

    #[error("Invalid odds: {0}")]
    InvalidOdds(String),

    #[error("Degenerate probability {probability} for game {game_id} {outcome}")]
    DegenerateProbability {
        game_id: GameId,
        outcome: Outcome,
        probability: Decimal,
    },

    #[error("No market to compare for game {game_id} provider {provider_id} {outcome}")]
    NoMarketToCompare {
        game_id: GameId,
        provider_id: ProviderId,
        outcome: Outcome,
    },

    #[error("Persistence failure during {operation}: {message}")]
    Persistence {
        operation: &'static str,
        message: String,
    },
}

impl EngineError {
    /// Wrap a store error, keeping the full context chain.
    pub fn persistence(operation: &'static str, err: anyhow::Error) -> Self {
        EngineError::Persistence {
            operation,
            message: format!("{err:#}"),
        }
    }

    /// Whether the run can continue past this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidOdds(_)
                | EngineError::DegenerateProbability { .. }
                | EngineError::NoMarketToCompare { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn price(observation_id: i64, decimal: Decimal) -> LinePrice {
        LinePrice {
            observation_id,
            decimal_odds: decimal,
            american_odds: 0,
            snapshot_time: Utc::now(),
        }
    }

    // -- Outcome --

    #[test]
    fn test_outcome_display_and_parse() {
        assert_eq!(format!("{}", Outcome::Home), "HOME");
        assert_eq!("away".parse::<Outcome>().unwrap(), Outcome::Away);
        assert_eq!("X".parse::<Outcome>().unwrap(), Outcome::Draw);
        assert!("over".parse::<Outcome>().is_err());
    }

    #[test]
    fn test_outcome_serializes_uppercase() {
        let json = serde_json::to_string(&Outcome::Home).unwrap();
        assert_eq!(json, "\"HOME\"");
        let parsed: Outcome = serde_json::from_str("\"AWAY\"").unwrap();
        assert_eq!(parsed, Outcome::Away);
    }

    // -- Lines --

    #[test]
    fn test_game_lines_quotes() {
        let mut game = GameLines::new(7);
        let mut l1 = ResolvedLine::new(7, 1);
        l1.prices.insert(Outcome::Home, price(10, dec!(2.0)));
        l1.prices.insert(Outcome::Away, price(11, dec!(1.8)));
        let mut l2 = ResolvedLine::new(7, 2);
        l2.prices.insert(Outcome::Home, price(12, dec!(2.2)));
        game.lines.insert(1, l1);
        game.lines.insert(2, l2);

        assert_eq!(game.provider_count(), 2);
        let home: Vec<_> = game.quotes(Outcome::Home).map(|(p, _)| p).collect();
        assert_eq!(home, vec![1, 2]);
        let away: Vec<_> = game.quotes(Outcome::Away).map(|(p, _)| p).collect();
        assert_eq!(away, vec![1]);
    }

    // -- FairPrice --

    #[test]
    fn test_fair_price_from_probability() {
        let fp = FairPrice::from_probability(1, Outcome::Home, None, dec!(0.5)).unwrap();
        assert_eq!(fp.decimal_odds, dec!(2));
        assert_eq!(fp.probability, dec!(0.5));
    }

    #[test]
    fn test_fair_price_rejects_degenerate_probability() {
        for p in [dec!(0), dec!(1), dec!(-0.1), dec!(1.2)] {
            let err = FairPrice::from_probability(1, Outcome::Away, None, p).unwrap_err();
            assert!(matches!(err, EngineError::DegenerateProbability { .. }));
            assert!(err.is_recoverable());
        }
    }

    #[test]
    fn test_fair_price_from_decimal() {
        let fp = FairPrice::from_decimal(1, Outcome::Home, Some(3), dec!(2.5)).unwrap();
        assert_eq!(fp.probability, dec!(0.4));
        assert_eq!(fp.provider_id, Some(3));
        assert!(FairPrice::from_decimal(1, Outcome::Home, None, dec!(1)).is_err());
        assert!(FairPrice::from_decimal(1, Outcome::Home, None, dec!(0)).is_err());
    }

    #[test]
    fn test_fair_price_book_prefers_provider_specific_price() {
        let mut book = FairPriceBook::new();
        book.insert(FairPrice::from_decimal(1, Outcome::Home, None, dec!(2.0)).unwrap());
        book.insert(FairPrice::from_decimal(1, Outcome::Home, Some(5), dec!(2.2)).unwrap());

        assert_eq!(book.len(), 2);
        assert_eq!(book.lookup(5, Outcome::Home).unwrap().decimal_odds, dec!(2.2));
        assert_eq!(book.lookup(6, Outcome::Home).unwrap().decimal_odds, dec!(2.0));
        assert!(book.lookup(5, Outcome::Away).is_none());
    }

    // -- Enums --

    #[test]
    fn test_run_type_roundtrip() {
        assert_eq!("Manual".parse::<RunType>().unwrap(), RunType::Manual);
        assert_eq!(serde_json::to_string(&RunType::Scheduled).unwrap(), "\"scheduled\"");
        assert!("hourly".parse::<RunType>().is_err());
    }

    #[test]
    fn test_risk_level_parse() {
        assert_eq!("HIGH".parse::<RiskLevel>().unwrap(), RiskLevel::High);
        assert_eq!(RiskLevel::Negative.to_string(), "Negative");
    }

    #[test]
    fn test_model_run_completion_flag() {
        let mut run = ModelRun {
            id: 1,
            model_id: 1,
            run_type: RunType::Manual,
            scope: Scope::new("NBA", "moneyline"),
            started_at: Utc::now(),
            finished_at: None,
            parameters: BTreeMap::new(),
        };
        assert!(!run.is_complete());
        run.finished_at = Some(Utc::now());
        assert!(run.is_complete());
    }

    #[test]
    fn test_recommendation_display() {
        let rec = BetRecommendation {
            run_id: 1,
            game_id: 42,
            provider_id: 3,
            outcome: Outcome::Home,
            american_odds: 150,
            decimal_odds: dec!(2.5),
            implied_probability: dec!(0.4),
            model_probability: dec!(0.45),
            edge: dec!(0.125),
            risk_level: RiskLevel::High,
            stake_fraction: None,
            created_at: Utc::now(),
            is_active: true,
        };
        let display = format!("{rec}");
        assert!(display.contains("+150"));
        assert!(display.contains("HOME"));
        assert!(display.contains("[High]"));
    }

    // -- EngineError --

    #[test]
    fn test_engine_error_display() {
        let e = EngineError::ConfigurationMissing("league NBA".to_string());
        assert_eq!(format!("{e}"), "Configuration missing: league NBA");

        let e = EngineError::persistence("create_run", anyhow::anyhow!("disk full"));
        assert_eq!(format!("{e}"), "Persistence failure during create_run: disk full");
        assert!(!e.is_recoverable());
    }
}

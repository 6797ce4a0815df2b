//! Pricing strategy: odds conversion, probability models, and edge scoring.

pub mod consensus;
pub mod edge;
pub mod elo;
pub mod odds;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{EngineError, FairPriceBook, GameInfo, GameLines, ModelIdentity, TeamId};

/// Default strength rating for a team with no stored rating.
pub const NEUTRAL_RATING: f64 = 1500.0;

/// Capability every probability model provides: fair prices for a game.
///
/// Implementations are deterministic given identical inputs. Any context a
/// model needs (ratings, etc.) is loaded before the first call.
pub trait ProbabilityModel: Send + Sync {
    /// Name, version and type code the model is registered under.
    fn identity(&self) -> ModelIdentity;

    /// Whether pricing needs the game's reference data (teams, season).
    fn requires_game_info(&self) -> bool;

    /// Fair prices for every side the model can price.
    ///
    /// Returns `DegenerateProbability` when the game cannot be priced at all;
    /// sides the model has no view on are simply absent from the book.
    fn compute_fair_prices(
        &self,
        lines: &GameLines,
        game: Option<&GameInfo>,
    ) -> Result<FairPriceBook, EngineError>;
}

/// Which model a run uses, as selected in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelSpec {
    /// Average of the other providers' prices.
    MarketConsensus { version: String },
    /// Logistic function of the Elo rating difference.
    Elo {
        version: String,
        /// Rate every game with this season's ratings instead of the game's own.
        season: Option<i32>,
        default_rating: f64,
    },
}

impl ModelSpec {
    pub fn name(&self) -> &'static str {
        match self {
            ModelSpec::MarketConsensus { .. } => consensus::MODEL_NAME,
            ModelSpec::Elo { .. } => elo::MODEL_NAME,
        }
    }

    pub fn version(&self) -> &str {
        match self {
            ModelSpec::MarketConsensus { version } | ModelSpec::Elo { version, .. } => version,
        }
    }

    /// Identity the selected model registers under.
    pub fn identity(&self) -> ModelIdentity {
        let type_code = match self {
            ModelSpec::MarketConsensus { .. } => consensus::TYPE_CODE,
            ModelSpec::Elo { .. } => elo::TYPE_CODE,
        };
        ModelIdentity {
            name: self.name().to_string(),
            version: self.version().to_string(),
            type_code: type_code.to_string(),
        }
    }
}

/// Instantiate the model a spec selects.
///
/// `ratings` maps season → team → rating and is ignored by models that
/// need no ratings.
pub fn build_model(
    spec: &ModelSpec,
    ratings: HashMap<i32, HashMap<TeamId, f64>>,
) -> Box<dyn ProbabilityModel> {
    match spec {
        ModelSpec::MarketConsensus { version } => {
            Box::new(consensus::ConsensusModel::new(version.clone()))
        }
        ModelSpec::Elo {
            version,
            season,
            default_rating,
        } => {
            let mut model = elo::EloModel::new(version.clone(), *default_rating, *season);
            for (s, table) in ratings {
                model.set_season_ratings(s, table);
            }
            Box::new(model)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_matches_built_model() {
        let specs = [
            ModelSpec::MarketConsensus {
                version: "1.0".to_string(),
            },
            ModelSpec::Elo {
                version: "2.1".to_string(),
                season: Some(2024),
                default_rating: NEUTRAL_RATING,
            },
        ];
        for spec in &specs {
            let model = build_model(spec, HashMap::new());
            assert_eq!(model.identity(), spec.identity());
        }
        assert_eq!(specs[1].identity().type_code, "RATING");
    }

    #[test]
    fn test_model_spec_from_toml() {
        let spec: ModelSpec =
            toml::from_str("kind = \"elo\"\nversion = \"1.0\"\ndefault_rating = 1450.0\n").unwrap();
        assert_eq!(
            spec,
            ModelSpec::Elo {
                version: "1.0".to_string(),
                season: None,
                default_rating: 1450.0,
            }
        );
    }
}

//! Rating-based (Elo) model.
//!
//! `p_home = 1 / (1 + 10^(-(r_home - r_away) / 400))`, `p_away = 1 - p_home`.
//! One game-wide fair price per side regardless of how many providers quote
//! the game.

use rust_decimal::prelude::*;
use std::collections::HashMap;
use tracing::warn;

use super::ProbabilityModel;
use crate::types::{
    EngineError, FairPrice, FairPriceBook, GameInfo, GameLines, ModelIdentity, Outcome, TeamId,
};

pub const MODEL_NAME: &str = "elo";
pub const TYPE_CODE: &str = "RATING";

/// Rating points for a 10x odds ratio.
const ELO_SCALE: f64 = 400.0;

/// Home win probability from two ratings.
pub fn win_probability(rating_home: f64, rating_away: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf(-(rating_home - rating_away) / ELO_SCALE))
}

pub struct EloModel {
    version: String,
    /// season → team → rating
    ratings: HashMap<i32, HashMap<TeamId, f64>>,
    default_rating: f64,
    /// When set, every game is rated with this season's table.
    fixed_season: Option<i32>,
}

impl EloModel {
    pub fn new(version: impl Into<String>, default_rating: f64, fixed_season: Option<i32>) -> Self {
        Self {
            version: version.into(),
            ratings: HashMap::new(),
            default_rating,
            fixed_season,
        }
    }

    /// Install the rating table for a season.
    pub fn set_season_ratings(&mut self, season: i32, ratings: HashMap<TeamId, f64>) {
        self.ratings.insert(season, ratings);
    }

    /// Season whose ratings apply to `game`.
    pub fn season_for(&self, game: &GameInfo) -> i32 {
        self.fixed_season.unwrap_or(game.season)
    }

    /// Team rating, falling back to the default when absent.
    pub fn rating(&self, season: i32, team_id: TeamId) -> f64 {
        self.ratings
            .get(&season)
            .and_then(|table| table.get(&team_id))
            .copied()
            .unwrap_or(self.default_rating)
    }
}

impl ProbabilityModel for EloModel {
    fn identity(&self) -> ModelIdentity {
        ModelIdentity {
            name: MODEL_NAME.to_string(),
            version: self.version.clone(),
            type_code: TYPE_CODE.to_string(),
        }
    }

    fn requires_game_info(&self) -> bool {
        true
    }

    fn compute_fair_prices(
        &self,
        _lines: &GameLines,
        game: Option<&GameInfo>,
    ) -> Result<FairPriceBook, EngineError> {
        let Some(game) = game else {
            return Ok(FairPriceBook::new());
        };
        let season = self.season_for(game);
        let home = self.rating(season, game.home_team_id);
        let away = self.rating(season, game.away_team_id);
        let p_home = win_probability(home, away);

        let degenerate = |probability: Decimal| EngineError::DegenerateProbability {
            game_id: game.game_id,
            outcome: Outcome::Home,
            probability,
        };

        if !(p_home > 0.0 && p_home < 1.0) {
            warn!(
                game_id = game.game_id,
                rating_home = home,
                rating_away = away,
                p_home,
                "Degenerate Elo probability, game skipped"
            );
            let probability = if p_home >= 1.0 { Decimal::ONE } else { Decimal::ZERO };
            return Err(degenerate(probability));
        }
        let p_home = Decimal::from_f64(p_home).ok_or_else(|| degenerate(Decimal::ZERO))?;
        let p_away = Decimal::ONE - p_home;

        let mut book = FairPriceBook::new();
        book.insert(FairPrice::from_probability(game.game_id, Outcome::Home, None, p_home)?);
        book.insert(FairPrice::from_probability(game.game_id, Outcome::Away, None, p_away)?);
        Ok(book)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::NEUTRAL_RATING;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn game(home: TeamId, away: TeamId, season: i32) -> GameInfo {
        GameInfo {
            game_id: 100,
            home_team_id: home,
            away_team_id: away,
            season,
            start_time: Utc::now(),
        }
    }

    fn model_with(ratings: &[(TeamId, f64)]) -> EloModel {
        let mut model = EloModel::new("1.0", NEUTRAL_RATING, None);
        model.set_season_ratings(2024, ratings.iter().copied().collect());
        model
    }

    #[test]
    fn test_no_view_without_game_reference() {
        let model = model_with(&[(1, 1600.0)]);
        assert!(model.requires_game_info());
        let book = model.compute_fair_prices(&GameLines::new(100), None).unwrap();
        assert!(book.is_empty());
    }

    #[test]
    fn test_equal_ratings_give_even_odds() {
        let model = model_with(&[(1, 1500.0), (2, 1500.0)]);
        let book = model
            .compute_fair_prices(&GameLines::new(100), Some(&game(1, 2, 2024)))
            .unwrap();
        let home = book.lookup(7, Outcome::Home).unwrap();
        let away = book.lookup(7, Outcome::Away).unwrap();
        assert_eq!(home.probability, dec!(0.5));
        assert_eq!(away.probability, dec!(0.5));
        assert_eq!(home.decimal_odds, dec!(2));
    }

    #[test]
    fn test_hundred_point_favourite() {
        let p = win_probability(1600.0, 1500.0);
        assert!((p - 0.6401).abs() < 0.0001, "p = {p}");

        let model = model_with(&[(1, 1600.0), (2, 1500.0)]);
        let book = model
            .compute_fair_prices(&GameLines::new(100), Some(&game(1, 2, 2024)))
            .unwrap();
        let home = book.lookup(1, Outcome::Home).unwrap().probability;
        let away = book.lookup(1, Outcome::Away).unwrap().probability;
        assert!((home - dec!(0.6401)).abs() < dec!(0.0001));
        assert_eq!(home + away, Decimal::ONE);
    }

    #[test]
    fn test_missing_rating_defaults_to_neutral() {
        let model = model_with(&[(1, 1500.0)]);
        assert_eq!(model.rating(2024, 99), 1500.0);
        assert_eq!(model.rating(1999, 1), 1500.0);

        let book = model
            .compute_fair_prices(&GameLines::new(100), Some(&game(1, 99, 2024)))
            .unwrap();
        assert_eq!(book.lookup(1, Outcome::Home).unwrap().probability, dec!(0.5));
    }

    #[test]
    fn test_custom_default_rating() {
        let mut model = EloModel::new("1.0", 1400.0, None);
        model.set_season_ratings(2024, [(1, 1800.0)].into_iter().collect());
        assert_eq!(model.rating(2024, 2), 1400.0);
        let p = win_probability(model.rating(2024, 1), model.rating(2024, 2));
        assert!(p > 0.9);
    }

    #[test]
    fn test_fixed_season_overrides_game_season() {
        let mut model = EloModel::new("1.0", NEUTRAL_RATING, Some(2023));
        model.set_season_ratings(2023, [(1, 1700.0)].into_iter().collect());
        model.set_season_ratings(2024, [(1, 1300.0)].into_iter().collect());

        let g = game(1, 2, 2024);
        assert_eq!(model.season_for(&g), 2023);
        let book = model.compute_fair_prices(&GameLines::new(100), Some(&g)).unwrap();
        assert!(book.lookup(1, Outcome::Home).unwrap().probability > dec!(0.5));
    }

    #[test]
    fn test_degenerate_probability_skips_game() {
        let model = model_with(&[(1, 100_000.0), (2, 0.0)]);
        let err = model
            .compute_fair_prices(&GameLines::new(100), Some(&game(1, 2, 2024)))
            .unwrap_err();
        assert!(matches!(err, EngineError::DegenerateProbability { game_id: 100, .. }));
    }

    #[test]
    fn test_one_price_per_side_regardless_of_providers() {
        let model = model_with(&[]);
        let book = model
            .compute_fair_prices(&GameLines::new(100), Some(&game(1, 2, 2024)))
            .unwrap();
        assert_eq!(book.len(), 2);
        assert!(book.iter().all(|p| p.provider_id.is_none()));
    }
}

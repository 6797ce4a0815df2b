//! Market-consensus model.
//!
//! The fair price for a provider's quote is the mean decimal price of every
//! *other* provider quoting the same side. Each provider therefore sees its
//! own view of "the market". No de-vigging: home + away implied
//! probabilities are not forced to sum to 1.

use rust_decimal::Decimal;
use tracing::debug;

use super::ProbabilityModel;
use crate::types::{
    EngineError, FairPrice, FairPriceBook, GameInfo, GameLines, ModelIdentity, Outcome,
};

pub const MODEL_NAME: &str = "market_consensus";
pub const TYPE_CODE: &str = "CONSENSUS";

pub struct ConsensusModel {
    version: String,
}

impl ConsensusModel {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }

    /// Mean decimal price of every provider except `excluded` quoting `outcome`.
    pub fn market_average(
        lines: &GameLines,
        outcome: Outcome,
        excluded: i64,
    ) -> Option<Decimal> {
        let (sum, count) = lines
            .quotes(outcome)
            .filter(|(provider_id, _)| *provider_id != excluded)
            .fold((Decimal::ZERO, 0u32), |(sum, count), (_, p)| {
                (sum + p.decimal_odds, count + 1)
            });
        if count == 0 {
            None
        } else {
            Some(sum / Decimal::from(count))
        }
    }
}

impl ProbabilityModel for ConsensusModel {
    fn identity(&self) -> ModelIdentity {
        ModelIdentity {
            name: MODEL_NAME.to_string(),
            version: self.version.clone(),
            type_code: TYPE_CODE.to_string(),
        }
    }

    fn requires_game_info(&self) -> bool {
        false
    }

    fn compute_fair_prices(
        &self,
        lines: &GameLines,
        _game: Option<&GameInfo>,
    ) -> Result<FairPriceBook, EngineError> {
        let mut book = FairPriceBook::new();

        if lines.provider_count() < 2 {
            debug!(game_id = lines.game_id, "Single provider, no market to compare");
            return Ok(book);
        }

        for (provider_id, line) in &lines.lines {
            for outcome in line.prices.keys() {
                let Some(average) = Self::market_average(lines, *outcome, *provider_id) else {
                    continue;
                };
                match FairPrice::from_decimal(lines.game_id, *outcome, Some(*provider_id), average) {
                    Ok(price) => book.insert(price),
                    Err(e) => debug!(game_id = lines.game_id, provider_id, error = %e, "Skipped"),
                }
            }
        }

        Ok(book)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

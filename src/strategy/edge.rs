//! Edge computation and risk classification.
//!
//! Scores every provider quote for a game against the model's fair price
//! and turns the result into a `BetRecommendation`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use super::odds;
use crate::types::{
    BetRecommendation, EngineError, FairPrice, FairPriceBook, GameLines, LinePrice, Outcome,
    ProviderId, RiskLevel, RunId,
};

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

/// Lower bound (inclusive) of the High tier.
pub const HIGH_EDGE: Decimal = dec!(0.06);
/// Lower bound (inclusive) of the Medium tier.
pub const MEDIUM_EDGE: Decimal = dec!(0.03);
/// Lower bound (inclusive) of the Low tier.
pub const LOW_EDGE: Decimal = dec!(0.01);

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

/// Relative edge of a book price over the fair price: `book / fair - 1`.
///
/// Both prices must be above 1.
pub fn compute_edge(book_decimal: Decimal, fair_decimal: Decimal) -> Result<Decimal, EngineError> {
    if book_decimal <= Decimal::ONE || fair_decimal <= Decimal::ONE {
        return Err(EngineError::InvalidOdds(format!(
            "cannot compute edge for book={book_decimal} fair={fair_decimal}"
        )));
    }
    Ok(book_decimal / fair_decimal - Decimal::ONE)
}

/// Map an edge onto its risk tier.
pub fn classify_risk(edge: Decimal) -> RiskLevel {
    if edge >= HIGH_EDGE {
        RiskLevel::High
    } else if edge >= MEDIUM_EDGE {
        RiskLevel::Medium
    } else if edge >= LOW_EDGE {
        RiskLevel::Low
    } else {
        RiskLevel::Negative
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Score a single provider quote against its governing fair price.
pub fn score_quote(
    run_id: RunId,
    game_id: i64,
    provider_id: ProviderId,
    outcome: Outcome,
    quote: &LinePrice,
    fair: Option<&FairPrice>,
    created_at: DateTime<Utc>,
) -> Result<BetRecommendation, EngineError> {
    let fair = fair.ok_or(EngineError::NoMarketToCompare {
        game_id,
        provider_id,
        outcome,
    })?;
    let edge = compute_edge(quote.decimal_odds, fair.decimal_odds)?;
    let implied_probability = odds::implied_probability(quote.decimal_odds)?;
    let risk_level = classify_risk(edge);

    debug!(
        game_id,
        provider_id,
        outcome = %outcome,
        book = %quote.decimal_odds,
        fair = %fair.decimal_odds,
        edge = %edge.round_dp(4),
        risk = %risk_level,
        "Quote scored"
    );

    Ok(BetRecommendation {
        run_id,
        game_id,
        provider_id,
        outcome,
        american_odds: quote.american_odds,
        decimal_odds: quote.decimal_odds,
        implied_probability,
        model_probability: fair.probability,
        edge,
        risk_level,
        stake_fraction: None,
        created_at,
        is_active: true,
    })
}

/// Score every (provider, outcome) quote of a game.
///
/// Each entry is either a recommendation or the recoverable reason the
/// pairing was skipped; the caller tallies the skips.
pub fn score_game(
    run_id: RunId,
    lines: &GameLines,
    book: &FairPriceBook,
    created_at: DateTime<Utc>,
) -> Vec<Result<BetRecommendation, EngineError>> {
    lines
        .lines
        .iter()
        .flat_map(|(provider_id, line)| {
            line.prices.iter().map(move |(outcome, quote)| {
                score_quote(
                    run_id,
                    lines.game_id,
                    *provider_id,
                    *outcome,
                    quote,
                    book.lookup(*provider_id, *outcome),
                    created_at,
                )
            })
        })
        .collect()
}

/// Sort recommendations best first: edge descending, then game, provider
/// and outcome so equal edges keep a stable order.
pub fn rank(recommendations: &mut [BetRecommendation]) {
    recommendations.sort_by(|a, b| {
        b.edge
            .cmp(&a.edge)
            .then(a.game_id.cmp(&b.game_id))
            .then(a.provider_id.cmp(&b.provider_id))
            .then(a.outcome.cmp(&b.outcome))
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResolvedLine;

    fn quote(decimal: Decimal, american: i32) -> LinePrice {
        LinePrice {
            observation_id: 1,
            decimal_odds: decimal,
            american_odds: american,
            snapshot_time: Utc::now(),
        }
    }

    #[test]
    fn test_compute_edge() {
        assert_eq!(compute_edge(dec!(2.2), dec!(2.0)).unwrap(), dec!(0.1));
        let e = compute_edge(dec!(2.0), dec!(2.2)).unwrap();
        assert!((e - dec!(-0.0909)).abs() < dec!(0.0001));
    }

    #[test]
    fn test_compute_edge_rejects_invalid_prices() {
        assert!(matches!(
            compute_edge(dec!(1), dec!(2)),
            Err(EngineError::InvalidOdds(_))
        ));
        assert!(compute_edge(dec!(2), dec!(1)).is_err());
        assert!(compute_edge(dec!(0.5), dec!(0.5)).is_err());
    }

    #[test]
    fn test_classify_risk_boundaries() {
        assert_eq!(classify_risk(dec!(0.06)), RiskLevel::High);
        assert_eq!(classify_risk(dec!(0.25)), RiskLevel::High);
        assert_eq!(classify_risk(dec!(0.0599999)), RiskLevel::Medium);
        assert_eq!(classify_risk(dec!(0.03)), RiskLevel::Medium);
        assert_eq!(classify_risk(dec!(0.0299999)), RiskLevel::Low);
        assert_eq!(classify_risk(dec!(0.01)), RiskLevel::Low);
        assert_eq!(classify_risk(dec!(0.0099999)), RiskLevel::Negative);
        assert_eq!(classify_risk(dec!(0)), RiskLevel::Negative);
        assert_eq!(classify_risk(dec!(-0.5)), RiskLevel::Negative);
    }

    #[test]
    fn test_score_quote_builds_recommendation() {
        let fair = FairPrice::from_probability(9, Outcome::Home, None, dec!(0.5)).unwrap();
        let rec = score_quote(1, 9, 4, Outcome::Home, &quote(dec!(2.2), 120), Some(&fair), Utc::now())
            .unwrap();

        assert_eq!(rec.edge, dec!(0.1));
        assert_eq!(rec.risk_level, RiskLevel::High);
        assert_eq!(rec.model_probability, dec!(0.5));
        assert_eq!(rec.american_odds, 120);
        assert!(rec.is_active);
        assert!(rec.stake_fraction.is_none());
        // edge == book / fair - 1
        assert_eq!(rec.edge, rec.decimal_odds / fair.decimal_odds - Decimal::ONE);
    }

    #[test]
    fn test_score_quote_without_fair_price() {
        let err = score_quote(1, 9, 4, Outcome::Away, &quote(dec!(2.2), 120), None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, EngineError::NoMarketToCompare { provider_id: 4, .. }));
    }

    #[test]
    fn test_score_game_covers_every_quote() {
        let mut lines = GameLines::new(9);
        let mut l1 = ResolvedLine::new(9, 1);
        l1.prices.insert(Outcome::Home, quote(dec!(2.1), 110));
        l1.prices.insert(Outcome::Away, quote(dec!(1.8), -125));
        lines.lines.insert(1, l1);

        let mut book = FairPriceBook::new();
        book.insert(FairPrice::from_probability(9, Outcome::Home, None, dec!(0.5)).unwrap());

        let results = score_game(7, &lines, &book, Utc::now());
        assert_eq!(results.len(), 2);
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().any(|r| matches!(r, Err(EngineError::NoMarketToCompare { .. }))));
    }

    #[test]
    fn test_rank_sorts_by_edge_descending() {
        let fair = FairPrice::from_probability(1, Outcome::Home, None, dec!(0.5)).unwrap();
        let mut recs: Vec<_> = [(1, dec!(2.02)), (2, dec!(2.3)), (3, dec!(1.9))]
            .into_iter()
            .map(|(provider, price)| {
                score_quote(1, 1, provider, Outcome::Home, &quote(price, 100), Some(&fair), Utc::now())
                    .unwrap()
            })
            .collect();

        rank(&mut recs);
        let order: Vec<_> = recs.iter().map(|r| r.provider_id).collect();
        assert_eq!(order, vec![2, 1, 3]);
    }
}

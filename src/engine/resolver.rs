//! Snapshot resolver.
//!
//! Reduces raw observations to the latest quote per (game, provider,
//! outcome) and groups the survivors by game. Ties on `snapshot_time` go to
//! the higher observation id so repeated runs pick the same row.

use std::collections::BTreeMap;
use tracing::debug;

use crate::strategy::odds::normalize_quote;
use crate::types::{GameId, GameLines, LinePrice, OddsObservation, Outcome, ProviderId, ResolvedLine};

/// Output of a resolution pass.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub games: BTreeMap<GameId, GameLines>,
    /// Latest observations dropped because their odds were unusable.
    pub invalid_odds: usize,
    /// Older observations replaced by a newer one for the same key.
    pub superseded: usize,
}

/// Keep only the most recent observation for each (game, provider, outcome).
pub fn latest_observations(
    observations: &[OddsObservation],
) -> BTreeMap<(GameId, ProviderId, Outcome), &OddsObservation> {
    let mut latest: BTreeMap<(GameId, ProviderId, Outcome), &OddsObservation> = BTreeMap::new();
    for obs in observations {
        let key = (obs.game_id, obs.provider_id, obs.outcome);
        let newer = latest.get(&key).map_or(true, |current| {
            (obs.snapshot_time, obs.id) > (current.snapshot_time, current.id)
        });
        if newer {
            latest.insert(key, obs);
        }
    }
    latest
}

/// Resolve observations into per-game provider lines.
pub fn resolve(observations: &[OddsObservation]) -> Resolution {
    let latest = latest_observations(observations);
    let mut resolution = Resolution {
        superseded: observations.len() - latest.len(),
        ..Default::default()
    };

    for ((game_id, provider_id, outcome), obs) in latest {
        let (decimal_odds, american_odds) = match normalize_quote(obs.american_odds, obs.decimal_odds) {
            Ok(q) => q,
            Err(e) => {
                debug!(
                    observation_id = obs.id,
                    game_id,
                    provider_id,
                    outcome = %outcome,
                    error = %e,
                    "Skipping observation with invalid odds"
                );
                resolution.invalid_odds += 1;
                continue;
            }
        };

        resolution
            .games
            .entry(game_id)
            .or_insert_with(|| GameLines::new(game_id))
            .lines
            .entry(provider_id)
            .or_insert_with(|| ResolvedLine::new(game_id, provider_id))
            .prices
            .insert(
                outcome,
                LinePrice {
                    observation_id: obs.id,
                    decimal_odds,
                    american_odds,
                    snapshot_time: obs.snapshot_time,
                },
            );
    }

    resolution
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

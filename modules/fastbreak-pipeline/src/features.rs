//! Pre-game features: rolling form, rest, injuries and market view for one
//! game, assembled entirely from records earlier stages already stored.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use fastbreak_common::{GameRow, NormalizedRecord, Stage};
use fastbreak_sources::{CollectError, StageCollector};

use crate::traits::CompletionTracker;

pub const SOURCE_NAME: &str = "derived:pregame_features";

/// Completed games per team folded into the rolling form window.
const DEFAULT_LOOKBACK: i64 = 10;

pub struct PregameFeaturesCollector {
    tracker: Arc<dyn CompletionTracker>,
    lookback: i64,
}

impl PregameFeaturesCollector {
    pub fn new(tracker: Arc<dyn CompletionTracker>) -> Self {
        Self {
            tracker,
            lookback: DEFAULT_LOOKBACK,
        }
    }

    pub fn with_lookback(mut self, lookback: i64) -> Self {
        self.lookback = lookback;
        self
    }
}

#[derive(Debug, Default, Serialize)]
pub struct TeamForm {
    pub games_sampled: usize,
    pub wins: usize,
    pub avg_points_for: f64,
    pub avg_points_against: f64,
    /// Days since the team's previous game, capped at 10.
    pub rest_days: Option<i64>,
}

impl TeamForm {
    pub fn net_rating(&self) -> f64 {
        self.avg_points_for - self.avg_points_against
    }
}

#[async_trait]
impl StageCollector for PregameFeaturesCollector {
    fn source_name(&self) -> &str {
        SOURCE_NAME
    }

    async fn collect(&self, entity_id: &str) -> Result<NormalizedRecord, CollectError> {
        let game = self
            .tracker
            .game(entity_id)
            .await
            .map_err(|e| CollectError::Storage(e.to_string()))?
            .ok_or_else(|| {
                CollectError::rejected(SOURCE_NAME, format!("unknown game {entity_id}"))
            })?;

        let home_form = self.team_form(&game.home_team, &game).await?;
        let away_form = self.team_form(&game.away_team, &game).await?;
        let (home_out, away_out) = self.injury_counts(entity_id, &game).await?;
        let market = self.market_view(entity_id).await?;

        debug!(
            game_id = entity_id,
            home_sample = home_form.games_sampled,
            away_sample = away_form.games_sampled,
            "Assembled pre-game features"
        );

        let payload = serde_json::json!({
            "home_team": game.home_team,
            "away_team": game.away_team,
            "tipoff_utc": game.tipoff_utc,
            "home": home_form,
            "away": away_form,
            "home_players_out": home_out,
            "away_players_out": away_out,
            "market": market,
        });

        // Early-season games legitimately have thin history; features built
        // from whatever exists are still final.
        Ok(NormalizedRecord::new(entity_id, Stage::PregameFeatures, payload))
    }
}

impl PregameFeaturesCollector {
    async fn team_form(&self, team: &str, game: &GameRow) -> Result<TeamForm, CollectError> {
        let prior = self
            .tracker
            .completed_games_before(team, game.tipoff_utc, self.lookback)
            .await
            .map_err(|e| CollectError::Storage(e.to_string()))?;

        let mut form = TeamForm::default();
        let mut points_for = 0u64;
        let mut points_against = 0u64;
        let mut latest_tipoff = None;

        for prior_id in &prior {
            let Some(prior_game) = self
                .tracker
                .game(prior_id)
                .await
                .map_err(|e| CollectError::Storage(e.to_string()))?
            else {
                continue;
            };
            let Some(boxscore) = self
                .tracker
                .record_payload(Stage::Boxscores, prior_id)
                .await
                .map_err(|e| CollectError::Storage(e.to_string()))?
            else {
                // Game is final but its boxscore stage has not landed yet.
                continue;
            };

            let home_score = score_of(&boxscore.payload, "home");
            let away_score = score_of(&boxscore.payload, "away");
            let (own, opp) = if prior_game.home_team == team {
                (home_score, away_score)
            } else {
                (away_score, home_score)
            };

            form.games_sampled += 1;
            points_for += u64::from(own);
            points_against += u64::from(opp);
            if own > opp {
                form.wins += 1;
            }
            if latest_tipoff.map_or(true, |t| prior_game.tipoff_utc > t) {
                latest_tipoff = Some(prior_game.tipoff_utc);
            }
        }

        if form.games_sampled > 0 {
            form.avg_points_for = points_for as f64 / form.games_sampled as f64;
            form.avg_points_against = points_against as f64 / form.games_sampled as f64;
        }
        form.rest_days =
            latest_tipoff.map(|t| (game.tipoff_utc - t).num_days().clamp(0, 10));
        Ok(form)
    }

    async fn injury_counts(
        &self,
        entity_id: &str,
        game: &GameRow,
    ) -> Result<(usize, usize), CollectError> {
        let Some(record) = self
            .tracker
            .record_payload(Stage::Injuries, entity_id)
            .await
            .map_err(|e| CollectError::Storage(e.to_string()))?
        else {
            return Ok((0, 0));
        };

        let empty = Vec::new();
        let entries = record.payload["entries"].as_array().unwrap_or(&empty);
        let out_for = |team: &str| {
            entries
                .iter()
                .filter(|e| {
                    e["team"].as_str() == Some(team)
                        && e["status"].as_str().is_some_and(|s| s.eq_ignore_ascii_case("out"))
                })
                .count()
        };
        Ok((out_for(&game.home_team), out_for(&game.away_team)))
    }

    /// First fully-priced book line, if betting data landed for this game.
    async fn market_view(&self, entity_id: &str) -> Result<serde_json::Value, CollectError> {
        let Some(record) = self
            .tracker
            .record_payload(Stage::Betting, entity_id)
            .await
            .map_err(|e| CollectError::Storage(e.to_string()))?
        else {
            return Ok(serde_json::Value::Null);
        };

        let empty = Vec::new();
        let line = record.payload["lines"]
            .as_array()
            .unwrap_or(&empty)
            .iter()
            .find(|l| !l["spread"].is_null() && !l["total"].is_null());

        Ok(match line {
            Some(l) => serde_json::json!({
                "book": l["book"],
                "spread": l["spread"],
                "total": l["total"],
            }),
            None => serde_json::Value::Null,
        })
    }
}

fn score_of(boxscore_payload: &serde_json::Value, side: &str) -> u32 {
    boxscore_payload[side]["score"].as_u64().unwrap_or(0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{scheduled_game, MemoryTracker};
    use fastbreak_common::{GameStatus, NormalizedRecord};
    use serde_json::json;

    fn boxscore(home: u32, away: u32) -> serde_json::Value {
        json!({ "home": { "score": home }, "away": { "score": away } })
    }

    #[tokio::test]
    async fn form_window_folds_prior_results() {
        let tracker = Arc::new(MemoryTracker::new());
        // BOS won at home by 10, then lost on the road by 5.
        tracker.seed_game(&scheduled_game("p1", "BOS", "MIA", 0, GameStatus::Final));
        tracker.seed_record(NormalizedRecord::new("p1", Stage::Boxscores, boxscore(110, 100)));
        tracker.seed_game(&scheduled_game("p2", "NYK", "BOS", 2, GameStatus::Final));
        tracker.seed_record(NormalizedRecord::new("p2", Stage::Boxscores, boxscore(105, 100)));
        tracker.seed_game(&scheduled_game("g", "BOS", "CHI", 5, GameStatus::Scheduled));

        let collector = PregameFeaturesCollector::new(tracker);
        let record = collector.collect("g").await.unwrap();

        assert!(record.complete);
        let home = &record.payload["home"];
        assert_eq!(home["games_sampled"], 2);
        assert_eq!(home["wins"], 1);
        assert_eq!(home["avg_points_for"], 105.0);
        assert_eq!(home["avg_points_against"], 102.5);
        assert_eq!(home["rest_days"], 3);
        // CHI has no history at all.
        assert_eq!(record.payload["away"]["games_sampled"], 0);
    }

    #[tokio::test]
    async fn injuries_and_market_flow_into_the_payload() {
        let tracker = Arc::new(MemoryTracker::new());
        tracker.seed_game(&scheduled_game("g", "BOS", "NYK", 0, GameStatus::Scheduled));
        tracker.seed_record(NormalizedRecord::new(
            "g",
            Stage::Injuries,
            json!({ "entries": [
                { "team": "BOS", "status": "Out" },
                { "team": "BOS", "status": "Questionable" },
                { "team": "NYK", "status": "Out" },
            ] }),
        ));
        tracker.seed_record(NormalizedRecord::new(
            "g",
            Stage::Betting,
            json!({ "lines": [
                { "book": "thin", "spread": -2.5, "total": null },
                { "book": "consensus", "spread": -3.5, "total": 220.0 },
            ] }),
        ));

        let collector = PregameFeaturesCollector::new(tracker);
        let record = collector.collect("g").await.unwrap();

        assert_eq!(record.payload["home_players_out"], 1);
        assert_eq!(record.payload["away_players_out"], 1);
        // The first fully priced line wins.
        assert_eq!(record.payload["market"]["book"], "consensus");
        assert_eq!(record.payload["market"]["spread"], -3.5);
    }

    #[tokio::test]
    async fn unknown_game_is_rejected() {
        let tracker = Arc::new(MemoryTracker::new());
        let collector = PregameFeaturesCollector::new(tracker);
        let err = collector.collect("missing").await.unwrap_err();
        assert!(matches!(err, CollectError::SourceRejected { .. }));
    }
}

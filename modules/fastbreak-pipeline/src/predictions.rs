//! Predictions: the last stage. Turns stored pre-game features into a win
//! probability and expected score line. The model sits behind a trait so a
//! trained one can replace the baseline without touching the pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use fastbreak_common::{NormalizedRecord, Stage};
use fastbreak_sources::{CollectError, StageCollector};

use crate::traits::CompletionTracker;

pub const SOURCE_NAME: &str = "derived:predictions";

/// League-average home court edge, in points.
const HOME_COURT_POINTS: f64 = 2.8;

#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub home_win_probability: f64,
    pub predicted_margin: f64,
    pub predicted_total: f64,
    pub model: String,
}

pub trait Predictor: Send + Sync {
    fn name(&self) -> &str;

    fn predict(&self, features: &serde_json::Value) -> Prediction;
}

/// Net-rating baseline: home court plus the difference in rolling net
/// rating, adjusted a point per extra player ruled out.
pub struct BaselinePredictor;

impl Predictor for BaselinePredictor {
    fn name(&self) -> &str {
        "baseline-net-rating"
    }

    fn predict(&self, features: &serde_json::Value) -> Prediction {
        let net = |side: &str| {
            features[side]["avg_points_for"].as_f64().unwrap_or(0.0)
                - features[side]["avg_points_against"].as_f64().unwrap_or(0.0)
        };
        let pace = |side: &str| features[side]["avg_points_for"].as_f64().unwrap_or(110.0);
        let out = |key: &str| features[key].as_u64().unwrap_or(0) as f64;

        let margin = HOME_COURT_POINTS + net("home") - net("away")
            - (out("home_players_out") - out("away_players_out"));
        // Logistic over margin; ~6 points of margin per standard deviation
        // keeps probabilities in a sane range.
        let probability = 1.0 / (1.0 + (-margin / 6.0).exp());
        let total = pace("home") + pace("away");

        Prediction {
            home_win_probability: probability,
            predicted_margin: margin,
            predicted_total: total,
            model: self.name().to_string(),
        }
    }
}

pub struct PredictionsCollector {
    tracker: Arc<dyn CompletionTracker>,
    predictor: Arc<dyn Predictor>,
}

impl PredictionsCollector {
    pub fn new(tracker: Arc<dyn CompletionTracker>, predictor: Arc<dyn Predictor>) -> Self {
        Self { tracker, predictor }
    }
}

#[async_trait]
impl StageCollector for PredictionsCollector {
    fn source_name(&self) -> &str {
        SOURCE_NAME
    }

    async fn collect(&self, entity_id: &str) -> Result<NormalizedRecord, CollectError> {
        let features = self
            .tracker
            .record_payload(Stage::PregameFeatures, entity_id)
            .await
            .map_err(|e| CollectError::Storage(e.to_string()))?
            .ok_or_else(|| {
                CollectError::rejected(SOURCE_NAME, format!("no stored features for {entity_id}"))
            })?;

        let prediction = self.predictor.predict(&features.payload);
        let payload = serde_json::to_value(&prediction)
            .map_err(|e| CollectError::rejected(SOURCE_NAME, e.to_string()))?;

        Ok(NormalizedRecord::new(entity_id, Stage::Predictions, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn features(home_net: f64, away_net: f64) -> serde_json::Value {
        json!({
            "home": { "avg_points_for": 110.0 + home_net, "avg_points_against": 110.0 },
            "away": { "avg_points_for": 110.0 + away_net, "avg_points_against": 110.0 },
            "home_players_out": 0,
            "away_players_out": 0,
        })
    }

    #[test]
    fn even_matchup_leans_home() {
        let p = BaselinePredictor.predict(&features(0.0, 0.0));
        assert!(p.predicted_margin > 0.0);
        assert!(p.home_win_probability > 0.5 && p.home_win_probability < 0.7);
    }

    #[test]
    fn stronger_road_team_flips_the_pick() {
        let p = BaselinePredictor.predict(&features(0.0, 10.0));
        assert!(p.predicted_margin < 0.0);
        assert!(p.home_win_probability < 0.5);
    }

    #[test]
    fn injuries_pull_the_margin_down() {
        let mut f = features(0.0, 0.0);
        f["home_players_out"] = json!(3);
        let with_outs = BaselinePredictor.predict(&f);
        let healthy = BaselinePredictor.predict(&features(0.0, 0.0));
        assert!(with_outs.predicted_margin < healthy.predicted_margin);
    }

    #[test]
    fn empty_features_still_produce_a_sane_line() {
        let p = BaselinePredictor.predict(&json!({}));
        assert!(p.home_win_probability > 0.0 && p.home_win_probability < 1.0);
        assert!(p.predicted_total > 0.0);
    }
}

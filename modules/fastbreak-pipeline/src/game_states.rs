//! Game states: score timeline and summary derived from stored play-by-play.
//! No network; the upstream record is read back from the store.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use fastbreak_common::{NormalizedRecord, Stage};
use fastbreak_sources::{CollectError, StageCollector};

use crate::traits::CompletionTracker;

pub const SOURCE_NAME: &str = "derived:game_states";

pub struct GameStatesCollector {
    tracker: Arc<dyn CompletionTracker>,
}

impl GameStatesCollector {
    pub fn new(tracker: Arc<dyn CompletionTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl StageCollector for GameStatesCollector {
    fn source_name(&self) -> &str {
        SOURCE_NAME
    }

    async fn collect(&self, entity_id: &str) -> Result<NormalizedRecord, CollectError> {
        let upstream = self
            .tracker
            .record_payload(Stage::Pbp, entity_id)
            .await
            .map_err(|e| CollectError::Storage(e.to_string()))?
            .ok_or_else(|| {
                CollectError::rejected(SOURCE_NAME, format!("no stored plays for {entity_id}"))
            })?;

        let payload = derive_state(&upstream.payload)
            .map_err(|reason| CollectError::rejected(SOURCE_NAME, reason))?;

        let record = NormalizedRecord::new(entity_id, Stage::GameStates, payload);
        Ok(if upstream.complete {
            record
        } else {
            record.partial()
        })
    }
}

#[derive(Deserialize)]
struct StoredAction {
    period: u8,
    #[serde(default)]
    action_type: String,
    #[serde(default)]
    sub_type: String,
    home_score: u32,
    away_score: u32,
}

#[derive(Serialize)]
struct PeriodScore {
    period: u8,
    home: u32,
    away: u32,
}

/// Fold the action list into the per-period timeline plus summary stats.
fn derive_state(pbp_payload: &serde_json::Value) -> Result<serde_json::Value, String> {
    let actions: Vec<StoredAction> = match pbp_payload.get("actions") {
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| format!("stored plays do not parse: {e}"))?,
        None => return Err("stored play record has no actions".to_string()),
    };
    if actions.is_empty() {
        return Err("stored play record is empty".to_string());
    }

    let mut periods: Vec<PeriodScore> = Vec::new();
    let mut lead_changes = 0u32;
    let mut largest_lead = 0i64;
    let mut last_sign = 0i64;

    for action in &actions {
        match periods.last_mut() {
            Some(p) if p.period == action.period => {
                p.home = action.home_score;
                p.away = action.away_score;
            }
            _ => periods.push(PeriodScore {
                period: action.period,
                home: action.home_score,
                away: action.away_score,
            }),
        }

        let margin = i64::from(action.home_score) - i64::from(action.away_score);
        if margin != 0 && last_sign != 0 && margin.signum() != last_sign {
            lead_changes += 1;
        }
        if margin != 0 {
            last_sign = margin.signum();
        }
        largest_lead = largest_lead.max(margin.abs());
    }

    // Guaranteed: actions is non-empty, so periods is too.
    let last = &periods[periods.len() - 1];
    let finished = actions
        .iter()
        .any(|a| a.action_type.eq_ignore_ascii_case("game") && a.sub_type.eq_ignore_ascii_case("end"));

    Ok(serde_json::json!({
        "final_home": last.home,
        "final_away": last.away,
        "finished": finished,
        "overtime": last.period > 4,
        "periods": periods,
        "lead_changes": lead_changes,
        "largest_lead": largest_lead,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn action(period: u8, home: u32, away: u32) -> serde_json::Value {
        json!({
            "action_number": 1, "period": period, "clock": "PT05M00.00S",
            "action_type": "2pt", "sub_type": "", "team": "BOS",
            "description": "x", "home_score": home, "away_score": away
        })
    }

    fn game_end(period: u8, home: u32, away: u32) -> serde_json::Value {
        json!({
            "action_number": 999, "period": period, "clock": "PT00M00.00S",
            "action_type": "game", "sub_type": "end", "team": null,
            "description": "Game End", "home_score": home, "away_score": away
        })
    }

    #[test]
    fn timeline_folds_into_period_scores() {
        let payload = json!({ "actions": [
            action(1, 30, 28),
            action(2, 55, 56),
            action(3, 80, 77),
            action(4, 110, 104),
            game_end(4, 110, 104),
        ] });
        let state = derive_state(&payload).unwrap();
        assert_eq!(state["final_home"], 110);
        assert_eq!(state["final_away"], 104);
        assert_eq!(state["finished"], true);
        assert_eq!(state["overtime"], false);
        assert_eq!(state["periods"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn lead_changes_and_largest_lead() {
        let payload = json!({ "actions": [
            action(1, 10, 4),   // home up 6
            action(2, 10, 12),  // away takes the lead
            action(3, 20, 12),  // home retakes it
            game_end(4, 30, 12),
        ] });
        let state = derive_state(&payload).unwrap();
        assert_eq!(state["lead_changes"], 2);
        assert_eq!(state["largest_lead"], 18);
    }

    #[test]
    fn overtime_is_flagged() {
        let payload = json!({ "actions": [action(4, 100, 100), game_end(5, 112, 108)] });
        let state = derive_state(&payload).unwrap();
        assert_eq!(state["overtime"], true);
    }

    #[test]
    fn empty_plays_are_rejected() {
        assert!(derive_state(&json!({ "actions": [] })).is_err());
        assert!(derive_state(&json!({})).is_err());
    }
}

//! Play-by-play. The live CDN feed is the primary source (fast, available
//! mid-game); the stats endpoint is the fallback and the only option for
//! older seasons. Both normalize into one action-list shape.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use fastbreak_common::{NormalizedRecord, Stage};

use crate::client::RateLimitedClient;
use crate::collector::StageCollector;
use crate::error::CollectError;

pub const DEFAULT_LIVE_PBP_URL: &str = "https://cdn.nba.com/static/json/liveData";
pub const DEFAULT_STATS_PBP_URL: &str = "https://stats.nba.com/stats";

/// One normalized play.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayAction {
    pub action_number: u32,
    pub period: u8,
    pub clock: String,
    pub action_type: String,
    #[serde(default)]
    pub sub_type: String,
    #[serde(default)]
    pub team: Option<String>,
    pub description: String,
    pub home_score: u32,
    pub away_score: u32,
}

impl PlayAction {
    fn ends_game(&self) -> bool {
        self.action_type.eq_ignore_ascii_case("game")
            && self.sub_type.eq_ignore_ascii_case("end")
            && self.period >= 4
    }
}

fn actions_record(entity_id: &str, actions: Vec<PlayAction>) -> NormalizedRecord {
    // Without the game-end marker this is a mid-game snapshot: store it,
    // flag partial, re-fetch next run.
    let finished = actions.iter().any(PlayAction::ends_game);
    let payload = serde_json::json!({ "actions": actions });
    let record = NormalizedRecord::new(entity_id, Stage::Pbp, payload);
    if finished {
        record
    } else {
        record.partial()
    }
}

// --- Live CDN feed ---------------------------------------------------------

pub struct LivePbpCollector {
    client: Arc<RateLimitedClient>,
    base_url: String,
}

impl LivePbpCollector {
    pub fn new(client: Arc<RateLimitedClient>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl StageCollector for LivePbpCollector {
    fn source_name(&self) -> &str {
        self.client.source_name()
    }

    async fn collect(&self, entity_id: &str) -> Result<NormalizedRecord, CollectError> {
        let url = format!("{}/playbyplay/playbyplay_{entity_id}.json", self.base_url);
        let raw = self.client.get_json(&url).await?;
        normalize_live(self.source_name(), entity_id, &raw)
    }
}

#[derive(Deserialize)]
struct LiveFeed {
    game: LiveGame,
}

#[derive(Deserialize)]
struct LiveGame {
    #[serde(default)]
    actions: Vec<LiveAction>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiveAction {
    action_number: u32,
    period: u8,
    clock: String,
    action_type: String,
    #[serde(default)]
    sub_type: String,
    #[serde(default)]
    team_tricode: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    score_home: String,
    #[serde(default)]
    score_away: String,
}

fn normalize_live(
    source: &str,
    entity_id: &str,
    raw: &serde_json::Value,
) -> Result<NormalizedRecord, CollectError> {
    let feed: LiveFeed = serde_json::from_value(raw.clone())
        .map_err(|e| CollectError::rejected(source, format!("malformed play feed: {e}")))?;

    let actions: Vec<PlayAction> = feed
        .game
        .actions
        .into_iter()
        .map(|a| PlayAction {
            action_number: a.action_number,
            period: a.period,
            clock: a.clock,
            action_type: a.action_type,
            sub_type: a.sub_type,
            team: a.team_tricode,
            description: a.description,
            home_score: a.score_home.parse().unwrap_or(0),
            away_score: a.score_away.parse().unwrap_or(0),
        })
        .collect();

    if actions.is_empty() {
        return Err(CollectError::rejected(
            source,
            format!("play feed for {entity_id} contained no actions"),
        ));
    }

    Ok(actions_record(entity_id, actions))
}

// --- Stats endpoint --------------------------------------------------------

pub struct StatsPbpCollector {
    client: Arc<RateLimitedClient>,
    base_url: String,
}

impl StatsPbpCollector {
    pub fn new(client: Arc<RateLimitedClient>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl StageCollector for StatsPbpCollector {
    fn source_name(&self) -> &str {
        self.client.source_name()
    }

    async fn collect(&self, entity_id: &str) -> Result<NormalizedRecord, CollectError> {
        let url = format!("{}/playbyplayv3?GameID={entity_id}", self.base_url);
        let raw = self.client.get_json(&url).await?;
        normalize_stats(self.source_name(), entity_id, &raw)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsFeed {
    game: StatsGame,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsGame {
    #[serde(default)]
    actions: Vec<StatsAction>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsAction {
    action_number: u32,
    period: u8,
    clock: String,
    action_type: String,
    #[serde(default)]
    sub_type: String,
    #[serde(default)]
    team_tricode: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    score_home: u32,
    #[serde(default)]
    score_away: u32,
}

fn normalize_stats(
    source: &str,
    entity_id: &str,
    raw: &serde_json::Value,
) -> Result<NormalizedRecord, CollectError> {
    let feed: StatsFeed = serde_json::from_value(raw.clone())
        .map_err(|e| CollectError::rejected(source, format!("malformed play feed: {e}")))?;

    let actions: Vec<PlayAction> = feed
        .game
        .actions
        .into_iter()
        .map(|a| PlayAction {
            action_number: a.action_number,
            period: a.period,
            clock: a.clock,
            action_type: a.action_type,
            sub_type: a.sub_type,
            team: a.team_tricode,
            description: a.description,
            home_score: a.score_home,
            away_score: a.score_away,
        })
        .collect();

    if actions.is_empty() {
        return Err(CollectError::rejected(
            source,
            format!("play feed for {entity_id} contained no actions"),
        ));
    }

    Ok(actions_record(entity_id, actions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn live_action(n: u32, period: u8, action_type: &str, sub_type: &str) -> serde_json::Value {
        json!({
            "actionNumber": n,
            "period": period,
            "clock": "PT00M00.00S",
            "actionType": action_type,
            "subType": sub_type,
            "teamTricode": "BOS",
            "description": "x",
            "scoreHome": "100",
            "scoreAway": "98"
        })
    }

    #[test]
    fn finished_game_is_complete() {
        let raw = json!({ "game": { "actions": [
            live_action(1, 1, "2pt", ""),
            live_action(700, 4, "game", "end"),
        ] } });
        let record = normalize_live("nba-live", "0022400001", &raw).unwrap();
        assert!(record.complete);
        assert_eq!(record.payload["actions"][0]["home_score"], 100);
    }

    #[test]
    fn mid_game_snapshot_is_partial() {
        let raw = json!({ "game": { "actions": [live_action(1, 2, "2pt", "")] } });
        let record = normalize_live("nba-live", "0022400001", &raw).unwrap();
        assert!(!record.complete);
    }

    #[test]
    fn overtime_end_still_counts_as_finished() {
        let raw = json!({ "game": { "actions": [live_action(800, 5, "game", "end")] } });
        let record = normalize_live("nba-live", "0022400001", &raw).unwrap();
        assert!(record.complete);
    }

    #[test]
    fn empty_action_list_is_rejected() {
        let raw = json!({ "game": { "actions": [] } });
        assert!(normalize_live("nba-live", "0022400001", &raw).is_err());
    }

    #[test]
    fn stats_feed_normalizes_to_the_same_shape() {
        let raw = json!({ "game": { "actions": [{
            "actionNumber": 700,
            "period": 4,
            "clock": "PT00M00.00S",
            "actionType": "game",
            "subType": "end",
            "teamTricode": null,
            "description": "Game End",
            "scoreHome": 100,
            "scoreAway": 98
        }] } });
        let record = normalize_stats("nba-stats", "0022400001", &raw).unwrap();
        assert!(record.complete);
        assert_eq!(record.payload["actions"][0]["away_score"], 98);
    }
}

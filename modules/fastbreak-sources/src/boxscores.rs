//! Final boxscores: per-team and per-player stat lines for a game.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use fastbreak_common::{NormalizedRecord, Stage};

use crate::client::RateLimitedClient;
use crate::collector::StageCollector;
use crate::error::CollectError;

pub const DEFAULT_BOXSCORE_URL: &str = "https://cdn.nba.com/static/json/liveData";

pub struct BoxscoresCollector {
    client: Arc<RateLimitedClient>,
    base_url: String,
}

impl BoxscoresCollector {
    pub fn new(client: Arc<RateLimitedClient>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl StageCollector for BoxscoresCollector {
    fn source_name(&self) -> &str {
        self.client.source_name()
    }

    async fn collect(&self, entity_id: &str) -> Result<NormalizedRecord, CollectError> {
        let url = format!("{}/boxscore/boxscore_{entity_id}.json", self.base_url);
        let raw = self.client.get_json(&url).await?;
        normalize(self.source_name(), entity_id, &raw)
    }
}

#[derive(Deserialize)]
struct BoxFeed {
    game: BoxGame,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BoxGame {
    /// 1 = scheduled, 2 = in progress, 3 = final.
    game_status: u8,
    home_team: BoxTeam,
    away_team: BoxTeam,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BoxTeam {
    team_tricode: String,
    #[serde(default)]
    score: u32,
    #[serde(default)]
    statistics: Option<serde_json::Value>,
    #[serde(default)]
    players: Vec<BoxPlayer>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BoxPlayer {
    person_id: u64,
    name: String,
    #[serde(default)]
    statistics: serde_json::Value,
}

fn team_payload(team: &BoxTeam) -> serde_json::Value {
    serde_json::json!({
        "team": team.team_tricode,
        "score": team.score,
        "statistics": team.statistics,
        "players": team.players,
    })
}

fn normalize(
    source: &str,
    entity_id: &str,
    raw: &serde_json::Value,
) -> Result<NormalizedRecord, CollectError> {
    let feed: BoxFeed = serde_json::from_value(raw.clone())
        .map_err(|e| CollectError::rejected(source, format!("malformed boxscore feed: {e}")))?;

    let game = &feed.game;
    let payload = serde_json::json!({
        "status": game.game_status,
        "home": team_payload(&game.home_team),
        "away": team_payload(&game.away_team),
    });

    // A boxscore is only final when the game is and both stat blocks exist.
    let done = game.game_status == 3
        && game.home_team.statistics.is_some()
        && game.away_team.statistics.is_some();

    let record = NormalizedRecord::new(entity_id, Stage::Boxscores, payload);
    Ok(if done { record } else { record.partial() })
}

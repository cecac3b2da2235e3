//! Game rosters: the active player list for both sides of a game.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use fastbreak_common::{NormalizedRecord, Stage};

use crate::client::RateLimitedClient;
use crate::collector::StageCollector;
use crate::error::CollectError;

pub const DEFAULT_ROSTER_URL: &str = "https://stats.nba.com/stats";

pub struct PlayersCollector {
    client: Arc<RateLimitedClient>,
    base_url: String,
}

impl PlayersCollector {
    pub fn new(client: Arc<RateLimitedClient>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl StageCollector for PlayersCollector {
    fn source_name(&self) -> &str {
        self.client.source_name()
    }

    async fn collect(&self, entity_id: &str) -> Result<NormalizedRecord, CollectError> {
        let url = format!("{}/gamerosters?GameID={entity_id}", self.base_url);
        let raw = self.client.get_json(&url).await?;
        normalize(self.source_name(), entity_id, &raw)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RosterFeed {
    home_team: RosterTeam,
    away_team: RosterTeam,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RosterTeam {
    team_tricode: String,
    #[serde(default)]
    players: Vec<RosterPlayer>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RosterPlayer {
    person_id: u64,
    name: String,
    #[serde(default)]
    position: String,
    #[serde(default = "default_active")]
    active: bool,
}

fn default_active() -> bool {
    true
}

fn normalize(
    source: &str,
    entity_id: &str,
    raw: &serde_json::Value,
) -> Result<NormalizedRecord, CollectError> {
    let feed: RosterFeed = serde_json::from_value(raw.clone())
        .map_err(|e| CollectError::rejected(source, format!("malformed roster feed: {e}")))?;

    let payload = serde_json::json!({
        "home": { "team": feed.home_team.team_tricode, "players": feed.home_team.players },
        "away": { "team": feed.away_team.team_tricode, "players": feed.away_team.players },
    });

    // A side with no roster yet (common well before tipoff) is usable but
    // not final.
    let both_sides = !feed.home_team.players.is_empty() && !feed.away_team.players.is_empty();

    let record = NormalizedRecord::new(entity_id, Stage::Players, payload);
    Ok(if both_sides { record } else { record.partial() })
}

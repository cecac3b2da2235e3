//! Season schedule feed. Runs over synthetic `season:<label>` entities and
//! produces the game list the rest of the pipeline is keyed on.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use fastbreak_common::{GameStatus, NormalizedRecord, ScheduledGame, Stage};

use crate::client::RateLimitedClient;
use crate::collector::StageCollector;
use crate::error::CollectError;

pub const DEFAULT_SCHEDULE_URL: &str = "https://cdn.nba.com/static/json/staticData";

pub struct ScheduleCollector {
    client: Arc<RateLimitedClient>,
    base_url: String,
}

impl ScheduleCollector {
    pub fn new(client: Arc<RateLimitedClient>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl StageCollector for ScheduleCollector {
    fn source_name(&self) -> &str {
        self.client.source_name()
    }

    async fn collect(&self, entity_id: &str) -> Result<NormalizedRecord, CollectError> {
        let season = entity_id.strip_prefix("season:").ok_or_else(|| {
            CollectError::rejected(
                self.source_name(),
                format!("schedule entity must be season-shaped, got {entity_id:?}"),
            )
        })?;

        let url = format!("{}/schedule/{season}.json", self.base_url);
        let raw = self.client.get_json(&url).await?;
        normalize(self.source_name(), entity_id, season, &raw)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleFeed {
    league_schedule: LeagueSchedule,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeagueSchedule {
    game_dates: Vec<GameDate>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GameDate {
    games: Vec<FeedGame>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeedGame {
    game_id: String,
    game_status: u8,
    #[serde(default)]
    game_status_text: String,
    // The feed capitalizes the whole UTC suffix, which camelCase misses.
    #[serde(rename = "gameDateTimeUTC")]
    game_date_time_utc: chrono::DateTime<chrono::Utc>,
    home_team: FeedTeam,
    away_team: FeedTeam,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeedTeam {
    team_tricode: String,
}

fn game_status(code: u8, text: &str) -> GameStatus {
    // Postponements keep status code 1 in the feed; the text is the only
    // reliable marker.
    if text.to_ascii_uppercase().contains("PPD") {
        return GameStatus::Postponed;
    }
    match code {
        2 => GameStatus::InProgress,
        3 => GameStatus::Final,
        _ => GameStatus::Scheduled,
    }
}

fn normalize(
    source: &str,
    entity_id: &str,
    season: &str,
    raw: &serde_json::Value,
) -> Result<NormalizedRecord, CollectError> {
    let feed: ScheduleFeed = serde_json::from_value(raw.clone())
        .map_err(|e| CollectError::rejected(source, format!("malformed schedule feed: {e}")))?;

    let games: Vec<ScheduledGame> = feed
        .league_schedule
        .game_dates
        .iter()
        .flat_map(|d| d.games.iter())
        .map(|g| ScheduledGame {
            game_id: g.game_id.clone(),
            season: season.to_string(),
            home_team: g.home_team.team_tricode.clone(),
            away_team: g.away_team.team_tricode.clone(),
            tipoff_utc: g.game_date_time_utc,
            status: game_status(g.game_status, &g.game_status_text),
        })
        .collect();

    if games.is_empty() {
        return Err(CollectError::rejected(
            source,
            format!("schedule feed for {season} contained no games"),
        ));
    }

    // The season entity stays partial while any game is still to be played,
    // so every run re-syncs statuses until the season wraps.
    let season_done = games
        .iter()
        .all(|g| matches!(g.status, GameStatus::Final | GameStatus::Postponed));

    let payload = serde_json::json!({ "games": games });
    let record = NormalizedRecord::new(entity_id, Stage::Schedule, payload);
    Ok(if season_done { record } else { record.partial() })
}

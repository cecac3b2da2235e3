//! Betting lines. Two independent books feed the same normalized shape:
//! ESPN's odds API is the primary, Covers the fallback. Wire the two
//! together with a [`FallbackCollector`](crate::collector::FallbackCollector).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use fastbreak_common::{NormalizedRecord, Stage};

use crate::client::RateLimitedClient;
use crate::collector::StageCollector;
use crate::error::CollectError;

pub const DEFAULT_ESPN_URL: &str =
    "https://sports.core.api.espn.com/v2/sports/basketball/leagues/nba";
pub const DEFAULT_COVERS_URL: &str = "https://www.covers.com/sport/basketball/nba";

/// One book's quote, normalized. Missing markets stay `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookLine {
    pub book: String,
    pub spread: Option<f64>,
    pub total: Option<f64>,
    pub home_moneyline: Option<i32>,
    pub away_moneyline: Option<i32>,
}

impl BookLine {
    /// A quote is usable once both core markets are priced.
    fn is_full(&self) -> bool {
        self.spread.is_some() && self.total.is_some()
    }
}

fn lines_record(entity_id: &str, lines: Vec<BookLine>) -> NormalizedRecord {
    let any_full = lines.iter().any(BookLine::is_full);
    let payload = serde_json::json!({ "lines": lines });
    let record = NormalizedRecord::new(entity_id, Stage::Betting, payload);
    if any_full {
        record
    } else {
        record.partial()
    }
}

// --- ESPN ------------------------------------------------------------------

pub struct EspnOddsCollector {
    client: Arc<RateLimitedClient>,
    base_url: String,
}

impl EspnOddsCollector {
    pub fn new(client: Arc<RateLimitedClient>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl StageCollector for EspnOddsCollector {
    fn source_name(&self) -> &str {
        self.client.source_name()
    }

    async fn collect(&self, entity_id: &str) -> Result<NormalizedRecord, CollectError> {
        let url = format!("{}/events/{entity_id}/competitions/{entity_id}/odds", self.base_url);
        let raw = self.client.get_json(&url).await?;
        normalize_espn(self.source_name(), entity_id, &raw)
    }
}

#[derive(Deserialize)]
struct EspnOddsFeed {
    #[serde(default)]
    items: Vec<EspnOddsItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EspnOddsItem {
    provider: EspnProvider,
    #[serde(default)]
    spread: Option<f64>,
    #[serde(default)]
    over_under: Option<f64>,
    #[serde(default)]
    home_team_odds: Option<EspnTeamOdds>,
    #[serde(default)]
    away_team_odds: Option<EspnTeamOdds>,
}

#[derive(Deserialize)]
struct EspnProvider {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EspnTeamOdds {
    #[serde(default)]
    money_line: Option<i32>,
}

fn normalize_espn(
    source: &str,
    entity_id: &str,
    raw: &serde_json::Value,
) -> Result<NormalizedRecord, CollectError> {
    let feed: EspnOddsFeed = serde_json::from_value(raw.clone())
        .map_err(|e| CollectError::rejected(source, format!("malformed odds feed: {e}")))?;

    let lines: Vec<BookLine> = feed
        .items
        .into_iter()
        .map(|item| BookLine {
            book: item.provider.name,
            spread: item.spread,
            total: item.over_under,
            home_moneyline: item.home_team_odds.and_then(|o| o.money_line),
            away_moneyline: item.away_team_odds.and_then(|o| o.money_line),
        })
        .collect();

    Ok(lines_record(entity_id, lines))
}

// --- Covers ----------------------------------------------------------------

pub struct CoversOddsCollector {
    client: Arc<RateLimitedClient>,
    base_url: String,
}

impl CoversOddsCollector {
    pub fn new(client: Arc<RateLimitedClient>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl StageCollector for CoversOddsCollector {
    fn source_name(&self) -> &str {
        self.client.source_name()
    }

    async fn collect(&self, entity_id: &str) -> Result<NormalizedRecord, CollectError> {
        let url = format!("{}/matchup/{entity_id}/odds.json", self.base_url);
        let raw = self.client.get_json(&url).await?;
        normalize_covers(self.source_name(), entity_id, &raw)
    }
}

#[derive(Deserialize)]
struct CoversFeed {
    #[serde(default)]
    lines: Vec<CoversLine>,
}

#[derive(Deserialize)]
struct CoversLine {
    book: String,
    #[serde(default)]
    spread: Option<f64>,
    #[serde(default)]
    total: Option<f64>,
    #[serde(default)]
    home_ml: Option<i32>,
    #[serde(default)]
    away_ml: Option<i32>,
}

fn normalize_covers(
    source: &str,
    entity_id: &str,
    raw: &serde_json::Value,
) -> Result<NormalizedRecord, CollectError> {
    let feed: CoversFeed = serde_json::from_value(raw.clone())
        .map_err(|e| CollectError::rejected(source, format!("malformed lines feed: {e}")))?;

    let lines: Vec<BookLine> = feed
        .lines
        .into_iter()
        .map(|line| BookLine {
            book: line.book,
            spread: line.spread,
            total: line.total,
            home_moneyline: line.home_ml,
            away_moneyline: line.away_ml,
        })
        .collect();

    Ok(lines_record(entity_id, lines))
}

//! League injury report, filtered to one game's teams upstream.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use fastbreak_common::{NormalizedRecord, Stage};

use crate::client::RateLimitedClient;
use crate::collector::StageCollector;
use crate::error::CollectError;

pub const DEFAULT_INJURY_URL: &str = "https://stats.nba.com/stats";

pub struct InjuriesCollector {
    client: Arc<RateLimitedClient>,
    base_url: String,
}

impl InjuriesCollector {
    pub fn new(client: Arc<RateLimitedClient>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl StageCollector for InjuriesCollector {
    fn source_name(&self) -> &str {
        self.client.source_name()
    }

    async fn collect(&self, entity_id: &str) -> Result<NormalizedRecord, CollectError> {
        let url = format!("{}/injuryreport?GameID={entity_id}", self.base_url);
        let raw = self.client.get_json(&url).await?;
        normalize(self.source_name(), entity_id, &raw)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InjuryFeed {
    // The feed capitalizes the whole UTC suffix, which camelCase misses.
    #[serde(default, rename = "reportGeneratedUTC")]
    report_generated_utc: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    players: Vec<InjuryEntry>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InjuryEntry {
    person_id: u64,
    name: String,
    team: String,
    /// Out, Doubtful, Questionable, Probable, Available.
    status: String,
    #[serde(default)]
    reason: String,
}

fn normalize(
    source: &str,
    entity_id: &str,
    raw: &serde_json::Value,
) -> Result<NormalizedRecord, CollectError> {
    let feed: InjuryFeed = serde_json::from_value(raw.clone())
        .map_err(|e| CollectError::rejected(source, format!("malformed injury feed: {e}")))?;

    let payload = serde_json::json!({
        "generated_at": feed.report_generated_utc,
        "entries": feed.players,
    });

    // An empty entry list is a legitimate final answer (nobody listed); a
    // feed with no generation timestamp means the report is not out yet.
    let record = NormalizedRecord::new(entity_id, Stage::Injuries, payload);
    Ok(if feed.report_generated_utc.is_some() {
        record
    } else {
        record.partial()
    })
}

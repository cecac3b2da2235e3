//! Production collector registry: one entry per stage, clients shared per
//! upstream host so throttling and budgets apply across stages.

use std::collections::HashMap;
use std::sync::Arc;

use fastbreak_common::{Config, Stage};
use fastbreak_sources::betting::{
    CoversOddsCollector, EspnOddsCollector, DEFAULT_COVERS_URL, DEFAULT_ESPN_URL,
};
use fastbreak_sources::boxscores::{BoxscoresCollector, DEFAULT_BOXSCORE_URL};
use fastbreak_sources::injuries::{InjuriesCollector, DEFAULT_INJURY_URL};
use fastbreak_sources::pbp::{
    LivePbpCollector, StatsPbpCollector, DEFAULT_LIVE_PBP_URL, DEFAULT_STATS_PBP_URL,
};
use fastbreak_sources::players::{PlayersCollector, DEFAULT_ROSTER_URL};
use fastbreak_sources::schedule::{ScheduleCollector, DEFAULT_SCHEDULE_URL};
use fastbreak_sources::{FallbackCollector, FetchSettings, RateLimitedClient, StageCollector};

use crate::features::PregameFeaturesCollector;
use crate::game_states::GameStatesCollector;
use crate::predictions::{BaselinePredictor, PredictionsCollector};
use crate::traits::CompletionTracker;

pub fn default_collectors(
    cfg: &Config,
    tracker: Arc<dyn CompletionTracker>,
) -> HashMap<Stage, Arc<dyn StageCollector>> {
    let settings = FetchSettings::from_config(cfg);
    let nba_cdn = Arc::new(RateLimitedClient::new("nba-cdn", settings.clone()));
    let nba_stats = Arc::new(RateLimitedClient::new("nba-stats", settings.clone()));
    let espn = Arc::new(RateLimitedClient::new("espn", settings.clone()));
    let covers = Arc::new(RateLimitedClient::new("covers", settings));

    let mut collectors: HashMap<Stage, Arc<dyn StageCollector>> = HashMap::new();
    collectors.insert(
        Stage::Schedule,
        Arc::new(ScheduleCollector::new(nba_cdn.clone(), DEFAULT_SCHEDULE_URL)),
    );
    collectors.insert(
        Stage::Players,
        Arc::new(PlayersCollector::new(nba_stats.clone(), DEFAULT_ROSTER_URL)),
    );
    collectors.insert(
        Stage::Injuries,
        Arc::new(InjuriesCollector::new(nba_stats.clone(), DEFAULT_INJURY_URL)),
    );
    collectors.insert(
        Stage::Betting,
        Arc::new(FallbackCollector::new(
            Box::new(EspnOddsCollector::new(espn, DEFAULT_ESPN_URL)),
            Box::new(CoversOddsCollector::new(covers, DEFAULT_COVERS_URL)),
        )),
    );
    collectors.insert(
        Stage::Pbp,
        Arc::new(FallbackCollector::new(
            Box::new(LivePbpCollector::new(nba_cdn.clone(), DEFAULT_LIVE_PBP_URL)),
            Box::new(StatsPbpCollector::new(nba_stats, DEFAULT_STATS_PBP_URL)),
        )),
    );
    collectors.insert(
        Stage::GameStates,
        Arc::new(GameStatesCollector::new(tracker.clone())),
    );
    collectors.insert(
        Stage::Boxscores,
        Arc::new(BoxscoresCollector::new(nba_cdn, DEFAULT_BOXSCORE_URL)),
    );
    collectors.insert(
        Stage::PregameFeatures,
        Arc::new(PregameFeaturesCollector::new(tracker.clone())),
    );
    collectors.insert(
        Stage::Predictions,
        Arc::new(PredictionsCollector::new(tracker, Arc::new(BaselinePredictor))),
    );
    collectors
}

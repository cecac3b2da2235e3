pub mod betting;
pub mod boxscores;
pub mod client;
pub mod collector;
pub mod error;
pub mod injuries;
pub mod pbp;
pub mod players;
pub mod schedule;

pub use client::{FetchSettings, RateLimitedClient};
pub use collector::{FallbackCollector, StageCollector};
pub use error::{CollectError, FetchError};

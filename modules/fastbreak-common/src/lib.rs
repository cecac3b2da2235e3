pub mod config;
pub mod stage;
pub mod types;

pub use config::Config;
pub use stage::{GameStatus, Stage, StageStatus};
pub use types::*;

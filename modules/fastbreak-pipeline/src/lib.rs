pub mod error;
pub mod features;
pub mod game_states;
pub mod orchestrator;
pub mod predictions;
pub mod report;
pub mod run_log;
pub mod runner;
pub mod testing;
pub mod traits;
pub mod wiring;

pub use error::PipelineError;
pub use orchestrator::{Orchestrator, RunOptions};
pub use report::{OverallStatus, RunReport, StageReport};
pub use traits::CompletionTracker;

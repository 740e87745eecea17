pub mod audit;
pub mod config;
pub mod errors;
pub mod executor;
pub mod models;
pub mod orchestrator;
pub mod planner;
pub mod providers;
pub mod sandbox;
pub mod telemetry;
pub mod util;

#[cfg(test)]
mod test_support;

pub use orchestrator::{FixResult, FixStatus, Orchestrator};

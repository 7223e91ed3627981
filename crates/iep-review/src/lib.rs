pub mod api;
pub mod config;
pub mod error;
pub mod gateway;
pub mod intake;
pub mod json_scan;
pub mod model;
pub mod normalizer;
pub mod orchestrator;
pub mod prompts;
pub mod rate_limit;
pub mod sample;
pub mod stats;
pub mod store;

pub use api::{build_router, AppState};

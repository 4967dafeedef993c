//! Craft Planner - crafting plan core
//!
//! Builds recipe trees for target items, keeps a market-data cache, writes
//! current prices onto plans and recommends where to buy materials.

pub mod cache;
pub mod cancel;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod progress;
pub mod scheduler;
pub mod services;
pub mod sources;
pub mod state;

#[cfg(test)]
mod testing;

pub use cancel::CancelToken;
pub use config::PlannerConfig;
pub use error::{AppError, Result};
pub use models::{AcquisitionSource, CraftingPlan, PlanNode};
pub use state::AppState;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the tracing subscriber. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "craft_planner=debug,reqwest=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

//! Auto-refresh scheduler
//!
//! Periodically refreshes the prices of a shared plan. Each tick goes
//! through the same entry point as a manual refresh, so a tick that lands
//! while another refresh is running is skipped rather than queued.

use crate::cancel::CancelToken;
use crate::config::PlannerConfig;
use crate::error::{AppError, Result};
use crate::models::CraftingPlan;
use crate::services::{PriceRefreshResult, PriceRefreshService};
use crate::state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Period used when neither the caller nor the settings pick one
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Periodic price refresh for one plan
pub struct AutoRefreshScheduler {
    state: Arc<AppState>,
    plan: Arc<RwLock<CraftingPlan>>,
    region: String,
    interval: Duration,
    cancel: CancelToken,
}

impl AutoRefreshScheduler {
    pub fn new(
        state: Arc<AppState>,
        plan: Arc<RwLock<CraftingPlan>>,
        region: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            state,
            plan,
            region: region.into(),
            interval,
            cancel: CancelToken::new(),
        }
    }

    /// `requested`, else the configured interval, else the default
    pub fn interval_for(config: &PlannerConfig, requested: Option<Duration>) -> Duration {
        requested
            .or(config.auto_refresh_interval)
            .filter(|d| !d.is_zero())
            .unwrap_or(DEFAULT_INTERVAL)
    }

    /// Token that stops the scheduler (and any refresh it is running)
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Start ticking; the first refresh happens one interval from now
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Auto-refresh scheduler started for {} every {}s",
                self.region,
                self.interval.as_secs()
            );
            let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once().await {
                            warn!("Auto-refresh failed: {}", e);
                        }
                    }
                }
            }
            info!("Auto-refresh scheduler stopped");
        })
    }

    /// One refresh; `Ok(None)` when another refresh held the guard
    pub async fn run_once(&self) -> Result<Option<PriceRefreshResult>> {
        match PriceRefreshService::refresh_shared_plan(&self.state, &self.plan, &self.region, &(), &self.cancel).await
        {
            Ok(result) => {
                debug!("Auto-refresh: {}", result.message);
                Ok(Some(result))
            }
            Err(AppError::RefreshInProgress) => {
                info!("Auto-refresh skipped, a refresh is already running");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

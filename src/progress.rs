//! Progress reporting for long-running operations

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

/// Which operation produced a progress update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    Discovery,
    Assembly,
    MarketFetch,
    PriceRefresh,
    Optimization,
}

/// A single progress event
#[derive(Debug, Clone, Serialize)]
pub struct ProgressUpdate {
    pub stage: ProgressStage,
    pub completed: usize,
    pub total: usize,
    pub message: String,
}

impl ProgressUpdate {
    pub fn new(stage: ProgressStage, completed: usize, total: usize, message: impl Into<String>) -> Self {
        Self {
            stage,
            completed,
            total,
            message: message.into(),
        }
    }
}

/// Receiver of progress events
pub trait ProgressReporter: Send + Sync {
    fn report(&self, update: ProgressUpdate);
}

/// Discards all progress
impl ProgressReporter for () {
    fn report(&self, _update: ProgressUpdate) {}
}

impl ProgressReporter for UnboundedSender<ProgressUpdate> {
    fn report(&self, update: ProgressUpdate) {
        // Receiver gone means nobody is listening any more
        let _ = self.send(update);
    }
}

//! Scheduler module
//!
//! Background tasks driven by a timer:
//! - Periodic price refresh of an open plan

mod auto_refresh;

pub use auto_refresh::AutoRefreshScheduler;

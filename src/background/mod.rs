//! Background services - periodic rate refresh
//!
//! Owned tokio tasks with an explicit start/stop lifecycle. Nothing here
//! outlives its owner: dropping a service cancels its task.

pub mod rate_refresh;

pub use rate_refresh::RateRefresher;

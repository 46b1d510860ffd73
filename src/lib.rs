//! Cauldron Ops: fill monitoring, ticket reconciliation and courier dispatch
//!
//! Noisy level samples from a set of cauldrons are turned into robust
//! fill/drain rates and discrete drain episodes. Declared transport tickets
//! are reconciled against those episodes, and overflow forecasts drive a
//! deadline-constrained courier schedule over a travel-time graph.
//!
//! ## Architecture
//!
//! - **Rate Estimator**: median fill/drain rates per entity
//! - **Drain Segmenter**: noisy series → drain episodes per day
//! - **Ticket Reconciler**: tickets vs episodes, suspicious/unlogged drains
//! - **Network Graph**: travel times and Dijkstra queries
//! - **Dispatch Scheduler**: greedy deadline-ordered route insertion
//! - **Drain Simulator**: in-flight dispatches and ticket resolution

pub mod config;
pub mod types;
pub mod ingest;
pub mod estimation;
pub mod segmentation;
pub mod reconciliation;
pub mod network;
pub mod dispatch;
pub mod simulator;
pub mod pipeline;
pub mod background;

// Re-export configuration
pub use config::OpsConfig;

// Re-export commonly used types
pub use types::{
    DispatchResult, DrainEpisode, Entity, EntityMeta, EntityRates, Forecast, LiveStatus,
    MatchResult, NetworkEdge, RateMap, ReconciliationReport, Route, RoutePlan, Sample, Task,
    TransportRecord,
};

// Re-export core components
pub use dispatch::DispatchScheduler;
pub use estimation::{RateEstimator, RateTable};
pub use network::NetworkGraph;
pub use reconciliation::TicketReconciler;
pub use segmentation::DrainSegmenter;
pub use simulator::DrainSimulator;

// Re-export the pipeline
pub use pipeline::{Coordinator, CoordinatorError};
pub use background::RateRefresher;

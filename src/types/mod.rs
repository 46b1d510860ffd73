//! Shared data structures for cauldron monitoring and dispatch
//!
//! - Entity / Sample: static metadata and raw level readings
//! - EntityRates: robust fill/drain rates per entity
//! - DrainEpisode: segmented drain events
//! - TransportRecord / MatchResult: tickets and their reconciliation
//! - NetworkEdge / Task / Route: the routing side
//! - LiveStatus / DispatchResult: live simulator views

mod entity;
mod rates;
mod episode;
mod ticket;
mod routing;
mod status;

pub use entity::*;
pub use rates::*;
pub use episode::*;
pub use ticket::*;
pub use routing::*;
pub use status::*;

//! Monitoring Pipeline Module
//!
//! ```text
//! SnapshotSource ─► normalize ─► Snapshot ─► rates / episodes / reconciliation
//!                                        └─► forecast ─► route plan
//! dispatch commands ─► DrainSimulator ─► live status
//! ```

mod state;
mod coordinator;

pub use state::*;
pub use coordinator::{Coordinator, CoordinatorError};

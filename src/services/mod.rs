//! Service layer for material-strategy
//!
//! Services hold the strategy rules and transaction boundaries; the
//! repository functions in `db/` stay rule-free.
//!
//! ```text
//! CLI / embedding caller
//!     ↓
//! Service Layer (read, cascade, reset)
//!     ↓
//! Repository Layer (db/*.rs)
//!     ↓
//! SQLite Database
//! ```

pub mod events;
pub mod strategy_service;
pub mod cascade_service;
pub mod reset_service;

// Re-exports
pub use events::{EventBus, EventListener, StrategyEvent};
pub use strategy_service::{MaterialState, MaterialStatus, StrategyLookup, StrategyService};
pub use cascade_service::{CascadeService, GroupUpdateOutcome, UpdateGroupParamsInput, UpdateMaterialParamsInput};
pub use reset_service::ResetService;

use std::sync::Arc;

use crate::db::membership::GroupMembership;
use crate::db::StrategyDb;

/// Service container for dependency injection
pub struct Services {
    pub strategy: Arc<StrategyService>,
    pub cascade: Arc<CascadeService>,
    pub reset: Arc<ResetService>,
    pub events: Arc<EventBus>,
}

impl Services {
    /// Create all services over a shared database and membership source
    pub fn new(db: Arc<StrategyDb>, membership: Arc<dyn GroupMembership>) -> Self {
        Self::with_events(db, membership, Arc::new(EventBus::new()))
    }

    pub fn with_events(
        db: Arc<StrategyDb>,
        membership: Arc<dyn GroupMembership>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            strategy: Arc::new(StrategyService::new(db.clone(), membership.clone())),
            cascade: Arc::new(CascadeService::new(db.clone(), membership.clone(), events.clone())),
            reset: Arc::new(ResetService::new(db, membership, events.clone())),
            events,
        }
    }
}

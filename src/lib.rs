//! Material Strategy - hierarchical strategy parameters for material groups
//!
//! A group holds a default strategy (a set of parameter/option pairs) and each
//! material of the group either inherits it or holds its own override.
//!
//! ## Architecture
//!
//! - **Strategy store** (`db::strategies`): rows keyed by (group, material),
//!   material `0` being the group default
//! - **Defaults** (`defaults`): canonical answer for unconfigured groups/materials
//! - **Cascade** (`services::cascade_service`): bootstrap and group-to-member propagation
//! - **Reset** (`services::reset_service`): copy the group default back onto members
//!
//! ## Material lifecycle
//!
//! ```text
//! Unconfigured --(group bootstrap)--> Bootstrapped --(material update)--> Diverged
//!                                          ^                                  |
//!                                          +-----------(reset)----------------+
//! ```

pub mod config;
pub mod db;
pub mod defaults;
pub mod error;
pub mod services;

// Re-exports
pub use config::Config;
pub use db::{DbStats, GroupMembership, InMemoryMembership, SqliteMembership, StrategyDb};
pub use db::{StrategyRow, StrategyValues, GROUP_DEFAULT_MATERIAL};
pub use error::{ErrorKind, StorageError};
pub use services::{
    CascadeService, GroupUpdateOutcome, MaterialState, MaterialStatus, ResetService, Services,
    StrategyEvent, StrategyLookup, StrategyService, UpdateGroupParamsInput, UpdateMaterialParamsInput,
};

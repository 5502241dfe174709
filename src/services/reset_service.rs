//! Reset service - force materials back to their group default
//!
//! Unlike a filtered cascade, a reset ignores whether a material had diverged.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::db::membership::GroupMembership;
use crate::db::strategies::{self, MaterialScope, StrategyFilter, StrategyRow};
use crate::db::StrategyDb;
use crate::error::StorageError;

use super::events::{EventBus, StrategyEvent};
use super::strategy_service::ensure_material_code;

pub struct ResetService {
    db: Arc<StrategyDb>,
    membership: Arc<dyn GroupMembership>,
    events: Arc<EventBus>,
}

impl ResetService {
    pub fn new(db: Arc<StrategyDb>, membership: Arc<dyn GroupMembership>, events: Arc<EventBus>) -> Self {
        Self { db, membership, events }
    }

    /// Overwrite every member row of a group with the group default
    pub fn reset_group_items(&self, group_code: i64) -> Result<Vec<StrategyRow>, StorageError> {
        let rows = self.db.with_transaction(|tx| {
            let baseline = require_group_default(tx, group_code)?;
            let result = strategies::update_where(
                tx,
                &StrategyFilter::group_members(group_code),
                &baseline.values(),
                Utc::now(),
            )?;
            Ok(result.rows)
        })?;

        debug!(group = group_code, count = rows.len(), "Reset group items");
        self.events.emit(StrategyEvent::GroupItemsReset {
            group_code,
            count: rows.len(),
        });

        Ok(rows)
    }

    /// Overwrite one material's row with its group default
    pub fn reset_item(&self, material_code: i64) -> Result<Vec<StrategyRow>, StorageError> {
        ensure_material_code(material_code)?;

        let group_code = self.membership.group_of(material_code)?.ok_or_else(|| {
            StorageError::MaterialNotFound {
                material_code,
                reason: "material does not belong to any group".into(),
            }
        })?;

        let rows = self.db.with_transaction(|tx| {
            let baseline = require_group_default(tx, group_code)?;
            let target = StrategyFilter {
                group_code: Some(group_code),
                scope: MaterialScope::Material(material_code),
                matching: None,
            };
            let rows = strategies::update_where(tx, &target, &baseline.values(), Utc::now())?.rows;
            if rows.is_empty() {
                return Err(StorageError::MaterialNotFound {
                    material_code,
                    reason: format!("material holds no strategy row in group {}", group_code),
                });
            }
            Ok(rows)
        })?;

        debug!(group = group_code, material = material_code, "Reset item");
        self.events.emit(StrategyEvent::ItemReset {
            group_code,
            material_code,
        });

        Ok(rows)
    }
}

fn require_group_default(conn: &rusqlite::Connection, group_code: i64) -> Result<StrategyRow, StorageError> {
    strategies::find_group_default(conn, group_code)?.ok_or_else(|| StorageError::GroupNotFound {
        group_code,
        reason: "no group default configured".into(),
    })
}

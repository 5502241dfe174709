//! Strategy read service
//!
//! Resolves the effective strategy for a group or a material, falling back to
//! the synthesized default when nothing has been stored yet.

use std::sync::Arc;

use serde::Serialize;

use crate::db::membership::GroupMembership;
use crate::db::strategies::{self, StrategyRow};
use crate::db::{DbStats, StrategyDb};
use crate::defaults;
use crate::error::StorageError;

/// A resolved strategy, tagged with where it came from
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", content = "strategy", rename_all = "snake_case")]
pub enum StrategyLookup {
    /// Row read from the store
    Existing(StrategyRow),
    /// Nothing stored; canonical default, not persisted
    Synthesized(StrategyRow),
}

impl StrategyLookup {
    pub fn row(&self) -> &StrategyRow {
        match self {
            StrategyLookup::Existing(row) | StrategyLookup::Synthesized(row) => row,
        }
    }

    pub fn is_synthesized(&self) -> bool {
        matches!(self, StrategyLookup::Synthesized(_))
    }
}

/// Where a member material stands relative to its group default
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialState {
    /// No row stored
    Unconfigured,
    /// Row equals the current group default
    Bootstrapped,
    /// Row holds an override
    Diverged,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaterialStatus {
    pub material_code: i64,
    pub state: MaterialState,
    pub strategy: Option<StrategyRow>,
}

/// Read service for strategies
pub struct StrategyService {
    db: Arc<StrategyDb>,
    membership: Arc<dyn GroupMembership>,
}

impl StrategyService {
    pub fn new(db: Arc<StrategyDb>, membership: Arc<dyn GroupMembership>) -> Self {
        Self { db, membership }
    }

    /// Group default, or the synthesized default when the group is unconfigured
    pub fn get_group_default(&self, group_code: i64) -> Result<StrategyLookup, StorageError> {
        let stored = self.db.with_conn(|conn| strategies::find_group_default(conn, group_code))?;

        Ok(match stored {
            Some(row) => StrategyLookup::Existing(row),
            None => StrategyLookup::Synthesized(defaults::synthesize_group_default(group_code)),
        })
    }

    /// Material row, or a synthesized default for a known but unconfigured material
    pub fn get_material_strategy(&self, material_code: i64) -> Result<StrategyLookup, StorageError> {
        ensure_material_code(material_code)?;

        let stored = self.db.with_conn(|conn| strategies::find_material_strategy(conn, material_code))?;
        if let Some(row) = stored {
            return Ok(StrategyLookup::Existing(row));
        }

        let group_code = self.membership.group_of(material_code)?.ok_or_else(|| {
            StorageError::MaterialNotFound {
                material_code,
                reason: "material does not belong to any group".into(),
            }
        })?;

        Ok(StrategyLookup::Synthesized(defaults::synthesize(group_code, material_code)))
    }

    /// State of every current member of a group
    pub fn group_status(&self, group_code: i64) -> Result<Vec<MaterialStatus>, StorageError> {
        let members = self.membership.members_of(group_code)?;

        let (group_default, rows) = self.db.with_conn(|conn| {
            let group_default = strategies::find_group_default(conn, group_code)?;
            let rows = strategies::list_group_material_rows(conn, group_code, true)?;
            Ok((group_default, rows))
        })?;

        Ok(members
            .into_iter()
            .map(|material_code| {
                let strategy = rows.iter().find(|r| r.material_code == material_code).cloned();
                let state = match (&strategy, &group_default) {
                    (None, _) => MaterialState::Unconfigured,
                    (Some(row), Some(base))
                        if row.values().matches(&base.values()) && row.client == base.client =>
                    {
                        MaterialState::Bootstrapped
                    }
                    (Some(_), _) => MaterialState::Diverged,
                };
                MaterialStatus {
                    material_code,
                    state,
                    strategy,
                }
            })
            .collect())
    }

    pub fn stats(&self) -> Result<DbStats, StorageError> {
        self.db.stats()
    }
}

pub(crate) fn ensure_material_code(material_code: i64) -> Result<(), StorageError> {
    if material_code == strategies::GROUP_DEFAULT_MATERIAL {
        return Err(StorageError::InvalidInput(
            "material_code 0 is reserved for group defaults".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::membership::InMemoryMembership;
    use crate::db::strategies::StrategyValues;
    use crate::error::ErrorKind;
    use chrono::Utc;

    fn setup() -> (Arc<StrategyDb>, Arc<InMemoryMembership>, StrategyService) {
        let db = Arc::new(StrategyDb::open_in_memory().unwrap());
        let membership = Arc::new(InMemoryMembership::new());
        let service = StrategyService::new(db.clone(), membership.clone());
        (db, membership, service)
    }

    #[test]
    fn test_unconfigured_group_is_synthesized() {
        let (_, _, service) = setup();
        let lookup = service.get_group_default(8).unwrap();

        assert!(lookup.is_synthesized());
        assert_eq!(lookup.row().group_code, 8);
        assert_eq!(lookup.row().values(), defaults::default_values());
    }

    #[test]
    fn test_unknown_material_is_not_found() {
        let (_, _, service) = setup();
        let err = service.get_material_strategy(404).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = service.get_material_strategy(0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_known_material_synthesized_with_its_group() {
        let (_, membership, service) = setup();
        membership.assign(81, 8).unwrap();

        let lookup = service.get_material_strategy(81).unwrap();
        assert!(lookup.is_synthesized());
        assert_eq!(lookup.row().group_code, 8);
        assert_eq!(lookup.row().material_code, 81);
    }

    #[test]
    fn test_lookup_serializes_with_source_tag() {
        let (_, _, service) = setup();
        let json = serde_json::to_value(service.get_group_default(1).unwrap()).unwrap();
        assert_eq!(json["source"], "synthesized");
        assert_eq!(json["strategy"]["client"], "default");
    }

    #[test]
    fn test_group_status_states() {
        let (db, membership, service) = setup();
        for material in [11, 12, 13] {
            membership.assign(material, 1).unwrap();
        }

        let base = StrategyValues {
            parameter_codes: vec![0, 1],
            option_codes: vec![2, 2],
            client: "acme".into(),
        };
        let custom = StrategyValues {
            option_codes: vec![5, 5],
            ..base.clone()
        };
        db.with_conn(|conn| {
            strategies::bulk_insert(
                conn,
                &[
                    StrategyRow::new(1, 0, base.clone(), Utc::now()),
                    StrategyRow::new(1, 11, base.clone(), Utc::now()),
                    StrategyRow::new(1, 12, custom.clone(), Utc::now()),
                ],
            )
        })
        .unwrap();

        let states: Vec<_> = service
            .group_status(1)
            .unwrap()
            .into_iter()
            .map(|s| (s.material_code, s.state))
            .collect();
        assert_eq!(
            states,
            vec![
                (11, MaterialState::Bootstrapped),
                (12, MaterialState::Diverged),
                (13, MaterialState::Unconfigured),
            ]
        );
    }
}

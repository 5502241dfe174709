//! Cascade service - group updates and their propagation to member materials
//!
//! The first update for a group bootstraps it: a default row plus one row per
//! current member, inserted together. Later updates overwrite the default and
//! cascade to the members, optionally only to those still equal to the
//! previous default. Both writes of an update commit as one transaction.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::db::membership::GroupMembership;
use crate::db::strategies::{self, StrategyFilter, StrategyRow, StrategyValues, GROUP_DEFAULT_MATERIAL};
use crate::db::StrategyDb;
use crate::error::StorageError;

use super::events::{EventBus, StrategyEvent};
use super::strategy_service::ensure_material_code;

/// Input for updating a group's strategy
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateGroupParamsInput {
    pub parameter_codes: Vec<i64>,
    pub option_codes: Vec<i64>,
    pub client: String,
    #[serde(default = "Utc::now")]
    pub effective_date: DateTime<Utc>,
    /// Cascade only to materials still equal to the previous group default
    #[serde(default, alias = "onlyMatchingGroupParams")]
    pub only_matching_group_params: bool,
}

impl UpdateGroupParamsInput {
    pub fn values(&self) -> StrategyValues {
        StrategyValues {
            parameter_codes: self.parameter_codes.clone(),
            option_codes: self.option_codes.clone(),
            client: self.client.clone(),
        }
    }
}

/// Input for updating a single material's strategy
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateMaterialParamsInput {
    pub parameter_codes: Vec<i64>,
    pub option_codes: Vec<i64>,
    pub client: String,
    #[serde(default = "Utc::now")]
    pub effective_date: DateTime<Utc>,
}

impl UpdateMaterialParamsInput {
    pub fn values(&self) -> StrategyValues {
        StrategyValues {
            parameter_codes: self.parameter_codes.clone(),
            option_codes: self.option_codes.clone(),
            client: self.client.clone(),
        }
    }
}

/// What a group update did
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GroupUpdateOutcome {
    /// First configuration: default row followed by one row per member
    Bootstrapped { rows: Vec<StrategyRow> },
    /// Existing default overwritten and cascaded
    Cascaded {
        group_default: StrategyRow,
        updated_members: Vec<StrategyRow>,
    },
}

impl GroupUpdateOutcome {
    /// Every row written by the update, group default first
    pub fn rows(&self) -> Vec<&StrategyRow> {
        match self {
            GroupUpdateOutcome::Bootstrapped { rows } => rows.iter().collect(),
            GroupUpdateOutcome::Cascaded {
                group_default,
                updated_members,
            } => std::iter::once(group_default).chain(updated_members).collect(),
        }
    }
}

/// Cascade service for group and material writes
pub struct CascadeService {
    db: Arc<StrategyDb>,
    membership: Arc<dyn GroupMembership>,
    events: Arc<EventBus>,
}

impl CascadeService {
    pub fn new(db: Arc<StrategyDb>, membership: Arc<dyn GroupMembership>, events: Arc<EventBus>) -> Self {
        Self { db, membership, events }
    }

    /// Set a group's strategy, bootstrapping the group on first use
    pub fn update_group_params(
        &self,
        group_code: i64,
        input: UpdateGroupParamsInput,
    ) -> Result<GroupUpdateOutcome, StorageError> {
        let values = input.values();
        values.validate()?;

        // Membership lives outside the strategy transaction
        let members = self.membership.members_of(group_code)?;

        let outcome = self.db.with_transaction(|tx| {
            match strategies::find_group_default(tx, group_code)? {
                Some(prior) => cascade(tx, group_code, &prior, &values, &input),
                None => bootstrap(tx, group_code, &members, &values, input.effective_date),
            }
        })?;

        let written = outcome.rows();
        match &outcome {
            GroupUpdateOutcome::Bootstrapped { .. } => {
                info!(group = group_code, rows = written.len(), "Bootstrapped group strategy");
                self.events.emit(StrategyEvent::GroupBootstrapped {
                    group_code,
                    materials: written
                        .iter()
                        .filter(|r| !r.is_group_default())
                        .map(|r| r.material_code)
                        .collect(),
                });
            }
            GroupUpdateOutcome::Cascaded { updated_members, .. } => {
                debug!(group = group_code, rows = written.len(), "Group strategy written");
                self.events.emit(StrategyEvent::GroupUpdated {
                    group_code,
                    cascaded: updated_members.len(),
                    only_matching: input.only_matching_group_params,
                });
            }
        }

        Ok(outcome)
    }

    /// Override one material's strategy. The material must already hold a row,
    /// which exists only once its group has been configured.
    pub fn update_material_params(
        &self,
        material_code: i64,
        input: UpdateMaterialParamsInput,
    ) -> Result<StrategyRow, StorageError> {
        ensure_material_code(material_code)?;
        let values = input.values();
        values.validate()?;

        let updated = self.db.with_transaction(|tx| {
            if strategies::find_material_strategy(tx, material_code)?.is_none() {
                return Err(StorageError::PreconditionFailed(format!(
                    "material {} has no strategy; configure its group first",
                    material_code
                )));
            }

            strategies::update_where(tx, &StrategyFilter::material(material_code), &values, input.effective_date)?
                .rows
                .into_iter()
                .next()
                .ok_or_else(|| StorageError::Internal("Material row vanished during update".into()))
        })?;

        debug!(material = material_code, group = updated.group_code, "Updated material strategy");
        self.events.emit(StrategyEvent::MaterialUpdated {
            group_code: updated.group_code,
            material_code,
        });

        Ok(updated)
    }
}

fn cascade(
    conn: &rusqlite::Connection,
    group_code: i64,
    prior: &StrategyRow,
    values: &StrategyValues,
    input: &UpdateGroupParamsInput,
) -> Result<GroupUpdateOutcome, StorageError> {
    let group_default = strategies::update_where(
        conn,
        &StrategyFilter::group_default(group_code),
        values,
        input.effective_date,
    )?
    .rows
    .into_iter()
    .next()
    .ok_or_else(|| StorageError::Internal("Group default vanished during update".into()))?;

    let mut targets = StrategyFilter::group_members(group_code);
    if input.only_matching_group_params {
        targets = targets.matching(prior.values());
    }

    let updated = strategies::update_where(conn, &targets, values, input.effective_date)?;
    debug!(
        group = group_code,
        cascaded = updated.affected,
        only_matching = input.only_matching_group_params,
        "Cascaded group strategy"
    );

    Ok(GroupUpdateOutcome::Cascaded {
        group_default,
        updated_members: updated.rows,
    })
}

fn bootstrap(
    conn: &rusqlite::Connection,
    group_code: i64,
    members: &[i64],
    values: &StrategyValues,
    effective_date: DateTime<Utc>,
) -> Result<GroupUpdateOutcome, StorageError> {
    if members.is_empty() {
        return Err(StorageError::GroupNotFound {
            group_code,
            reason: "group has no member materials".into(),
        });
    }

    let rows: Vec<StrategyRow> = std::iter::once(GROUP_DEFAULT_MATERIAL)
        .chain(members.iter().copied())
        .map(|material_code| StrategyRow::new(group_code, material_code, values.clone(), effective_date))
        .collect();

    let rows = strategies::bulk_insert(conn, &rows).map_err(|e| match e {
        StorageError::Conflict(detail) => {
            warn!(group = group_code, %detail, "Bootstrap conflicts with existing strategy rows");
            StorageError::Conflict(format!(
                "group {} cannot be bootstrapped; a member already holds a strategy row ({})",
                group_code, detail
            ))
        }
        other => other,
    })?;

    Ok(GroupUpdateOutcome::Bootstrapped { rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::membership::InMemoryMembership;
    use crate::error::ErrorKind;

    fn setup(members: &[(i64, i64)]) -> (Arc<StrategyDb>, CascadeService) {
        let db = Arc::new(StrategyDb::open_in_memory().unwrap());
        let membership = Arc::new(InMemoryMembership::new());
        for (material, group) in members {
            membership.assign(*material, *group).unwrap();
        }
        let service = CascadeService::new(db.clone(), membership, Arc::new(EventBus::new()));
        (db, service)
    }

    fn group_input(options: &[i64], only_matching: bool) -> UpdateGroupParamsInput {
        UpdateGroupParamsInput {
            parameter_codes: (0..options.len() as i64).collect(),
            option_codes: options.to_vec(),
            client: "acme".into(),
            effective_date: Utc::now(),
            only_matching_group_params: only_matching,
        }
    }

    #[test]
    fn test_bootstrap_requires_members() {
        let (db, service) = setup(&[]);
        let err = service.update_group_params(1, group_input(&[1], false)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(db.stats().unwrap().configured_groups, 0);
    }

    #[test]
    fn test_second_update_cascades() {
        let (_, service) = setup(&[(10, 1), (11, 1)]);
        let first = service.update_group_params(1, group_input(&[1, 1], false)).unwrap();
        assert!(matches!(first, GroupUpdateOutcome::Bootstrapped { ref rows } if rows.len() == 3));

        let second = service.update_group_params(1, group_input(&[2, 2], false)).unwrap();
        let written: Vec<_> = second.rows().iter().map(|r| r.material_code).collect();
        assert_eq!(written, vec![0, 10, 11]);
        match second {
            GroupUpdateOutcome::Cascaded { group_default, updated_members } => {
                assert_eq!(group_default.option_codes, vec![2, 2]);
                assert_eq!(updated_members.len(), 2);
            }
            other => panic!("expected cascade, got {:?}", other),
        }
    }

    #[test]
    fn test_misaligned_input_rejected_before_write() {
        let (db, service) = setup(&[(10, 1)]);
        let mut input = group_input(&[1, 1], false);
        input.option_codes.pop();

        let err = service.update_group_params(1, input).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(db.stats().unwrap().configured_groups, 0);
    }

    #[test]
    fn test_input_accepts_camel_case_flag_and_default_date() {
        let input: UpdateGroupParamsInput = serde_json::from_str(
            r#"{"parameter_codes":[0],"option_codes":[3],"client":"acme","onlyMatchingGroupParams":true}"#,
        )
        .unwrap();
        assert!(input.only_matching_group_params);
        assert!(input.effective_date <= Utc::now());
    }
}

//! Material group membership
//!
//! Membership is owned by the material catalogue. Strategy services only read
//! it through [`GroupMembership`]; `assign_material` exists for seeding.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::StrategyDb;
use crate::error::StorageError;

/// Read-only view of which materials belong to which group
pub trait GroupMembership: Send + Sync {
    /// Materials of `group_code`, ascending, without duplicates
    fn members_of(&self, group_code: i64) -> Result<Vec<i64>, StorageError>;

    /// Group holding `material_code`, if the material is known
    fn group_of(&self, material_code: i64) -> Result<Option<i64>, StorageError>;
}

pub fn list_group_members(conn: &Connection, group_code: i64) -> Result<Vec<i64>, StorageError> {
    let mut stmt = conn
        .prepare("SELECT material_code FROM material_groups WHERE group_code = ? ORDER BY material_code")
        .map_err(|e| StorageError::from_sqlite("Prepare failed", e))?;

    let members = stmt
        .query_map(params![group_code], |row| row.get(0))
        .map_err(|e| StorageError::from_sqlite("Query failed", e))?
        .collect::<Result<Vec<i64>, _>>()
        .map_err(|e| StorageError::from_sqlite("Row parse failed", e))?;

    Ok(members)
}

pub fn find_material_group(conn: &Connection, material_code: i64) -> Result<Option<i64>, StorageError> {
    conn.query_row(
        "SELECT group_code FROM material_groups WHERE material_code = ?",
        params![material_code],
        |row| row.get(0),
    )
    .optional()
    .map_err(|e| StorageError::from_sqlite("Membership lookup failed", e))
}

/// Place a material in a group, moving it if it already belongs elsewhere
pub fn assign_material(conn: &Connection, material_code: i64, group_code: i64) -> Result<(), StorageError> {
    if material_code == 0 {
        return Err(StorageError::InvalidInput(
            "material_code 0 is reserved for group defaults".into(),
        ));
    }

    conn.execute(
        r#"
        INSERT INTO material_groups (material_code, group_code) VALUES (?, ?)
        ON CONFLICT(material_code) DO UPDATE SET group_code = excluded.group_code
        "#,
        params![material_code, group_code],
    )
    .map_err(|e| StorageError::from_sqlite("Membership upsert failed", e))?;

    debug!(material_code, group_code, "Assigned material to group");
    Ok(())
}

/// Membership read from the `material_groups` table of a [`StrategyDb`]
pub struct SqliteMembership {
    db: Arc<StrategyDb>,
}

impl SqliteMembership {
    pub fn new(db: Arc<StrategyDb>) -> Self {
        Self { db }
    }

    pub fn assign(&self, material_code: i64, group_code: i64) -> Result<(), StorageError> {
        self.db.with_conn(|conn| assign_material(conn, material_code, group_code))
    }
}

impl GroupMembership for SqliteMembership {
    fn members_of(&self, group_code: i64) -> Result<Vec<i64>, StorageError> {
        self.db.with_conn(|conn| list_group_members(conn, group_code))
    }

    fn group_of(&self, material_code: i64) -> Result<Option<i64>, StorageError> {
        self.db.with_conn(|conn| find_material_group(conn, material_code))
    }
}

/// Membership held in memory, for callers that source it from elsewhere
#[derive(Default)]
pub struct InMemoryMembership {
    groups: RwLock<BTreeMap<i64, i64>>,
}

impl InMemoryMembership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&self, material_code: i64, group_code: i64) -> Result<(), StorageError> {
        if material_code == 0 {
            return Err(StorageError::InvalidInput(
                "material_code 0 is reserved for group defaults".into(),
            ));
        }
        self.groups
            .write()
            .map_err(|e| StorageError::Internal(format!("Lock poisoned: {}", e)))?
            .insert(material_code, group_code);
        Ok(())
    }
}

impl GroupMembership for InMemoryMembership {
    fn members_of(&self, group_code: i64) -> Result<Vec<i64>, StorageError> {
        let groups = self
            .groups
            .read()
            .map_err(|e| StorageError::Internal(format!("Lock poisoned: {}", e)))?;
        Ok(groups
            .iter()
            .filter(|(_, group)| **group == group_code)
            .map(|(material, _)| *material)
            .collect())
    }

    fn group_of(&self, material_code: i64) -> Result<Option<i64>, StorageError> {
        let groups = self
            .groups
            .read()
            .map_err(|e| StorageError::Internal(format!("Lock poisoned: {}", e)))?;
        Ok(groups.get(&material_code).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_membership() {
        let db = Arc::new(StrategyDb::open_in_memory().unwrap());
        let membership = SqliteMembership::new(db);

        membership.assign(20, 2).unwrap();
        membership.assign(10, 2).unwrap();
        membership.assign(30, 3).unwrap();

        assert_eq!(membership.members_of(2).unwrap(), vec![10, 20]);
        assert_eq!(membership.group_of(30).unwrap(), Some(3));
        assert_eq!(membership.group_of(99).unwrap(), None);

        // Moving a material keeps it in exactly one group
        membership.assign(20, 3).unwrap();
        assert_eq!(membership.members_of(2).unwrap(), vec![10]);
        assert_eq!(membership.members_of(3).unwrap(), vec![20, 30]);
    }

    #[test]
    fn test_sentinel_material_rejected() {
        let memory = InMemoryMembership::new();
        assert!(memory.assign(0, 1).is_err());
    }

    #[test]
    fn test_in_memory_membership() {
        let memory = InMemoryMembership::new();
        memory.assign(7, 1).unwrap();
        memory.assign(5, 1).unwrap();
        assert_eq!(memory.members_of(1).unwrap(), vec![5, 7]);
        assert_eq!(memory.group_of(5).unwrap(), Some(1));
        assert!(memory.members_of(2).unwrap().is_empty());
    }
}

//! Strategy row storage
//!
//! Free functions over `&Connection` so services can compose several of them
//! inside one transaction. `bulk_insert` and `update_where` each wrap their
//! statements in a savepoint, which makes them atomic on their own and nests
//! cleanly inside an outer transaction.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::StorageError;

/// `material_code` sentinel marking a group's default row
pub const GROUP_DEFAULT_MATERIAL: i64 = 0;

/// The values every strategy write carries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyValues {
    pub parameter_codes: Vec<i64>,
    pub option_codes: Vec<i64>,
    pub client: String,
}

impl StrategyValues {
    /// Elementwise, order-sensitive comparison of parameter and option codes.
    /// `client` does not take part.
    pub fn matches(&self, other: &StrategyValues) -> bool {
        codes_equal(&self.parameter_codes, &other.parameter_codes)
            && codes_equal(&self.option_codes, &other.option_codes)
    }

    pub fn validate(&self) -> Result<(), StorageError> {
        if self.parameter_codes.len() != self.option_codes.len() {
            return Err(StorageError::InvalidInput(format!(
                "parameter_codes has {} entries but option_codes has {}",
                self.parameter_codes.len(),
                self.option_codes.len()
            )));
        }

        if self.client.trim().is_empty() {
            return Err(StorageError::InvalidInput("client is required".into()));
        }

        Ok(())
    }
}

fn codes_equal(left: &[i64], right: &[i64]) -> bool {
    left.len() == right.len() && left.iter().zip(right).all(|(a, b)| a == b)
}

/// Strategy row from database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRow {
    pub group_code: i64,
    pub material_code: i64,
    pub client: String,
    pub parameter_codes: Vec<i64>,
    pub option_codes: Vec<i64>,
    pub effective_date: DateTime<Utc>,
}

impl StrategyRow {
    pub fn new(
        group_code: i64,
        material_code: i64,
        values: StrategyValues,
        effective_date: DateTime<Utc>,
    ) -> Self {
        Self {
            group_code,
            material_code,
            client: values.client,
            parameter_codes: values.parameter_codes,
            option_codes: values.option_codes,
            effective_date,
        }
    }

    pub fn values(&self) -> StrategyValues {
        StrategyValues {
            parameter_codes: self.parameter_codes.clone(),
            option_codes: self.option_codes.clone(),
            client: self.client.clone(),
        }
    }

    pub fn is_group_default(&self) -> bool {
        self.material_code == GROUP_DEFAULT_MATERIAL
    }

    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            group_code: row.get("group_code")?,
            material_code: row.get("material_code")?,
            client: row.get("client")?,
            parameter_codes: decode_codes(row, "parameter_codes")?,
            option_codes: decode_codes(row, "option_codes")?,
            effective_date: row.get("effective_date")?,
        })
    }
}

fn decode_codes(row: &Row, column: &str) -> Result<Vec<i64>, rusqlite::Error> {
    let idx = row.as_ref().column_index(column)?;
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn encode_codes(codes: &[i64]) -> Result<String, StorageError> {
    Ok(serde_json::to_string(codes)?)
}

/// Which rows of a group an update or listing addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaterialScope {
    /// Every row, group default included
    #[default]
    All,
    /// Only the `material_code = 0` row
    GroupDefault,
    /// Every row except the group default
    Members,
    /// A single material row
    Material(i64),
}

/// Predicate for [`update_where`]
#[derive(Debug, Clone, Default)]
pub struct StrategyFilter {
    pub group_code: Option<i64>,
    pub scope: MaterialScope,
    /// Keep only rows whose codes match these values
    pub matching: Option<StrategyValues>,
}

impl StrategyFilter {
    pub fn group_default(group_code: i64) -> Self {
        Self {
            group_code: Some(group_code),
            scope: MaterialScope::GroupDefault,
            matching: None,
        }
    }

    pub fn group_members(group_code: i64) -> Self {
        Self {
            group_code: Some(group_code),
            scope: MaterialScope::Members,
            matching: None,
        }
    }

    pub fn material(material_code: i64) -> Self {
        Self {
            group_code: None,
            scope: MaterialScope::Material(material_code),
            matching: None,
        }
    }

    pub fn matching(mut self, values: StrategyValues) -> Self {
        self.matching = Some(values);
        self
    }

    fn accepts(&self, row: &StrategyRow) -> bool {
        match &self.matching {
            Some(expected) => row.values().matches(expected),
            None => true,
        }
    }
}

/// Result of [`update_where`]
#[derive(Debug, Clone, Serialize)]
pub struct UpdateResult {
    pub affected: usize,
    pub rows: Vec<StrategyRow>,
}

/// Get the group default row
pub fn find_group_default(conn: &Connection, group_code: i64) -> Result<Option<StrategyRow>, StorageError> {
    conn.query_row(
        "SELECT * FROM strategy_params WHERE group_code = ? AND material_code = ?",
        params![group_code, GROUP_DEFAULT_MATERIAL],
        |row| StrategyRow::from_row(row),
    )
    .optional()
    .map_err(|e| StorageError::from_sqlite("Group default lookup failed", e))
}

/// Get the row held by a material, wherever its group is
pub fn find_material_strategy(conn: &Connection, material_code: i64) -> Result<Option<StrategyRow>, StorageError> {
    conn.query_row(
        "SELECT * FROM strategy_params WHERE material_code = ? AND material_code <> ?",
        params![material_code, GROUP_DEFAULT_MATERIAL],
        |row| StrategyRow::from_row(row),
    )
    .optional()
    .map_err(|e| StorageError::from_sqlite("Material strategy lookup failed", e))
}

/// List a group's rows ordered by material code
pub fn list_group_material_rows(
    conn: &Connection,
    group_code: i64,
    exclude_default: bool,
) -> Result<Vec<StrategyRow>, StorageError> {
    let filter = StrategyFilter {
        group_code: Some(group_code),
        scope: if exclude_default { MaterialScope::Members } else { MaterialScope::All },
        matching: None,
    };
    select_rows(conn, &filter)
}

fn select_rows(conn: &Connection, filter: &StrategyFilter) -> Result<Vec<StrategyRow>, StorageError> {
    let mut sql = String::from("SELECT * FROM strategy_params");
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];
    let mut conditions = vec![];

    if let Some(group_code) = filter.group_code {
        conditions.push("group_code = ?");
        params.push(Box::new(group_code));
    }

    match filter.scope {
        MaterialScope::All => {}
        MaterialScope::GroupDefault => {
            conditions.push("material_code = ?");
            params.push(Box::new(GROUP_DEFAULT_MATERIAL));
        }
        MaterialScope::Members => {
            conditions.push("material_code <> ?");
            params.push(Box::new(GROUP_DEFAULT_MATERIAL));
        }
        MaterialScope::Material(code) => {
            conditions.push("material_code = ?");
            params.push(Box::new(code));
        }
    }

    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    sql.push_str(" ORDER BY group_code, material_code");

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| StorageError::from_sqlite("Prepare failed", e))?;

    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let rows = stmt
        .query_map(param_refs.as_slice(), |row| StrategyRow::from_row(row))
        .map_err(|e| StorageError::from_sqlite("Query failed", e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StorageError::from_sqlite("Row parse failed", e))?;

    Ok(rows)
}

/// Insert all rows or none.
///
/// Any row colliding with an existing `(group_code, material_code)` or an
/// existing material row fails the whole batch with `Conflict`.
pub fn bulk_insert(conn: &Connection, rows: &[StrategyRow]) -> Result<Vec<StrategyRow>, StorageError> {
    for row in rows {
        row.values().validate()?;
    }

    with_savepoint(conn, "strategy_bulk_insert", |conn| {
        let mut stmt = conn
            .prepare(
                r#"
                INSERT INTO strategy_params (
                    group_code, material_code, client,
                    parameter_codes, option_codes, effective_date
                ) VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .map_err(|e| StorageError::from_sqlite("Prepare failed", e))?;

        for row in rows {
            stmt.execute(params![
                row.group_code,
                row.material_code,
                row.client,
                encode_codes(&row.parameter_codes)?,
                encode_codes(&row.option_codes)?,
                row.effective_date,
            ])
            .map_err(|e| {
                StorageError::from_sqlite(
                    &format!("Insert failed for group {} material {}", row.group_code, row.material_code),
                    e,
                )
            })?;
        }

        debug!(count = rows.len(), "Inserted strategy rows");
        Ok(rows.to_vec())
    })
}

/// Overwrite every row selected by `filter` with `values`
pub fn update_where(
    conn: &Connection,
    filter: &StrategyFilter,
    values: &StrategyValues,
    effective_date: DateTime<Utc>,
) -> Result<UpdateResult, StorageError> {
    values.validate()?;

    let parameter_codes = encode_codes(&values.parameter_codes)?;
    let option_codes = encode_codes(&values.option_codes)?;

    with_savepoint(conn, "strategy_update_where", |conn| {
        let targets: Vec<StrategyRow> = select_rows(conn, filter)?
            .into_iter()
            .filter(|row| filter.accepts(row))
            .collect();

        let mut stmt = conn
            .prepare(
                r#"
                UPDATE strategy_params
                SET client = ?, parameter_codes = ?, option_codes = ?, effective_date = ?
                WHERE group_code = ? AND material_code = ?
                "#,
            )
            .map_err(|e| StorageError::from_sqlite("Prepare failed", e))?;

        let mut updated = Vec::with_capacity(targets.len());
        for target in targets {
            stmt.execute(params![
                values.client,
                parameter_codes,
                option_codes,
                effective_date,
                target.group_code,
                target.material_code,
            ])
            .map_err(|e| StorageError::from_sqlite("Update failed", e))?;

            updated.push(StrategyRow::new(
                target.group_code,
                target.material_code,
                values.clone(),
                effective_date,
            ));
        }

        debug!(affected = updated.len(), ?filter, "Updated strategy rows");
        Ok(UpdateResult {
            affected: updated.len(),
            rows: updated,
        })
    })
}

fn with_savepoint<T>(
    conn: &Connection,
    name: &str,
    f: impl FnOnce(&Connection) -> Result<T, StorageError>,
) -> Result<T, StorageError> {
    conn.execute_batch(&format!("SAVEPOINT {}", name))
        .map_err(|e| StorageError::from_sqlite("Savepoint failed", e))?;

    match f(conn) {
        Ok(value) => {
            conn.execute_batch(&format!("RELEASE {}", name))
                .map_err(|e| StorageError::from_sqlite("Savepoint release failed", e))?;
            Ok(value)
        }
        Err(err) => {
            // Report the failure that triggered the rollback
            if let Err(rollback) = conn.execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name}")) {
                warn!(savepoint = name, error = %rollback, "Savepoint rollback failed");
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;
    use crate::error::ErrorKind;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::init_schema(&conn).unwrap();
        conn
    }

    fn values(options: &[i64], client: &str) -> StrategyValues {
        StrategyValues {
            parameter_codes: (0..options.len() as i64).collect(),
            option_codes: options.to_vec(),
            client: client.to_string(),
        }
    }

    fn row(group: i64, material: i64, v: &StrategyValues) -> StrategyRow {
        StrategyRow::new(group, material, v.clone(), Utc::now())
    }

    #[test]
    fn test_matches_is_order_sensitive() {
        let a = values(&[1, 2, 3], "acme");
        let mut b = values(&[1, 2, 3], "other");
        assert!(a.matches(&b));

        b.option_codes = vec![3, 2, 1];
        assert!(!a.matches(&b));

        b.option_codes = vec![1, 2];
        b.parameter_codes = vec![0, 1];
        assert!(!a.matches(&b));
    }

    #[test]
    fn test_validate_rejects_misaligned_codes() {
        let mut v = values(&[1, 2], "acme");
        v.option_codes.push(9);
        assert_eq!(v.validate().unwrap_err().kind(), ErrorKind::InvalidInput);

        let blank = values(&[1], " ");
        assert_eq!(blank.validate().unwrap_err().kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_insert_and_find() {
        let conn = test_conn();
        let v = values(&[1, 1], "acme");
        bulk_insert(&conn, &[row(5, 0, &v), row(5, 51, &v), row(5, 52, &v)]).unwrap();

        let default = find_group_default(&conn, 5).unwrap().unwrap();
        assert!(default.is_group_default());
        assert_eq!(default.values(), v);

        let material = find_material_strategy(&conn, 52).unwrap().unwrap();
        assert_eq!(material.group_code, 5);

        assert!(find_group_default(&conn, 6).unwrap().is_none());
        assert!(find_material_strategy(&conn, 0).unwrap().is_none());

        assert_eq!(list_group_material_rows(&conn, 5, false).unwrap().len(), 3);
        let members = list_group_material_rows(&conn, 5, true).unwrap();
        assert_eq!(
            members.iter().map(|r| r.material_code).collect::<Vec<_>>(),
            vec![51, 52]
        );
    }

    #[test]
    fn test_bulk_insert_is_all_or_nothing() {
        let conn = test_conn();
        let v = values(&[1], "acme");
        bulk_insert(&conn, &[row(1, 0, &v), row(1, 10, &v)]).unwrap();

        // Material 10 already belongs to group 1
        let err = bulk_insert(&conn, &[row(2, 0, &v), row(2, 10, &v)]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConflictViolation);
        assert!(find_group_default(&conn, 2).unwrap().is_none());
        assert!(list_group_material_rows(&conn, 2, false).unwrap().is_empty());
    }

    #[test]
    fn test_failed_standalone_insert_closes_savepoint() {
        let conn = test_conn();
        let v = values(&[1], "acme");
        bulk_insert(&conn, &[row(1, 0, &v)]).unwrap();

        assert!(bulk_insert(&conn, &[row(9, 0, &v), row(1, 0, &v)]).is_err());
        assert!(conn.is_autocommit());

        // The connection keeps working outside any transaction
        bulk_insert(&conn, &[row(9, 0, &v)]).unwrap();
        assert!(find_group_default(&conn, 9).unwrap().is_some());
    }

    #[test]
    fn test_update_where_respects_matching_filter() {
        let conn = test_conn();
        let base = values(&[0, 0], "acme");
        let custom = values(&[4, 4], "acme");
        bulk_insert(&conn, &[row(3, 0, &base), row(3, 31, &base), row(3, 32, &custom)]).unwrap();

        let next = values(&[7, 7], "acme");
        let result = update_where(
            &conn,
            &StrategyFilter::group_members(3).matching(base.clone()),
            &next,
            Utc::now(),
        )
        .unwrap();

        assert_eq!(result.affected, 1);
        assert_eq!(result.rows[0].material_code, 31);
        assert_eq!(find_material_strategy(&conn, 31).unwrap().unwrap().values(), next);
        assert_eq!(find_material_strategy(&conn, 32).unwrap().unwrap().values(), custom);
        assert_eq!(find_group_default(&conn, 3).unwrap().unwrap().values(), base);
    }

    #[test]
    fn test_update_where_no_match_is_empty() {
        let conn = test_conn();
        let result = update_where(&conn, &StrategyFilter::material(99), &values(&[1], "acme"), Utc::now())
            .unwrap();
        assert_eq!(result.affected, 0);
        assert!(result.rows.is_empty());
    }
}

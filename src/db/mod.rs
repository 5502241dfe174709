//! SQLite database module for strategy parameters
//!
//! ## Tables
//!
//! - `strategy_params` - One row per (group, material); material 0 is the group default
//! - `material_groups` - Material to group membership
//!
//! All access goes through a single connection behind a mutex. Multi-row
//! mutations run in `IMMEDIATE` transactions so a read-then-write sequence
//! holds the write lock from its first statement, which also serializes
//! writers coming from other processes sharing the file.

pub mod schema;
pub mod strategies;
pub mod membership;

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::StorageError;

/// SQLite database for strategy rows and membership
pub struct StrategyDb {
    conn: Mutex<Connection>,
}

impl StrategyDb {
    /// Open or create the database described by `config`
    pub fn open(config: &Config) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&config.storage_dir)?;
        Self::open_path(&config.database_path(), Duration::from_millis(config.busy_timeout_ms))
    }

    /// Open or create a database file
    pub fn open_path(db_path: &Path, busy_timeout: Duration) -> Result<Self, StorageError> {
        info!("Opening SQLite database at {:?}", db_path);

        let conn = Connection::open(db_path)
            .map_err(|e| StorageError::from_sqlite("Failed to open SQLite", e))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| StorageError::from_sqlite("Failed to set PRAGMA", e))?;
        conn.busy_timeout(busy_timeout)
            .map_err(|e| StorageError::from_sqlite("Failed to set busy timeout", e))?;

        Self::with_schema(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, StorageError> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory()
            .map_err(|e| StorageError::from_sqlite("Failed to open in-memory SQLite", e))?;

        Self::with_schema(conn)
    }

    fn with_schema(conn: Connection) -> Result<Self, StorageError> {
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run a read or single-statement write against the connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> Result<T, StorageError>,
    {
        let conn = self.conn.lock()
            .map_err(|e| StorageError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Execute a write operation with exclusive access
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StorageError>,
    {
        let mut conn = self.conn.lock()
            .map_err(|e| StorageError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Run `f` inside an IMMEDIATE transaction.
    ///
    /// Commits when `f` succeeds; any error rolls back every statement `f` issued.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Transaction) -> Result<T, StorageError>,
    {
        self.with_conn_mut(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|e| StorageError::from_sqlite("Transaction failed", e))?;

            let value = f(&tx)?;

            tx.commit()
                .map_err(|e| StorageError::from_sqlite("Commit failed", e))?;
            Ok(value)
        })
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, StorageError> {
        self.with_conn(|conn| {
            let count = |sql: &str| -> Result<u64, StorageError> {
                conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                    .map(|n| n as u64)
                    .map_err(|e| StorageError::from_sqlite("Query failed", e))
            };

            Ok(DbStats {
                configured_groups: count("SELECT COUNT(*) FROM strategy_params WHERE material_code = 0")?,
                material_rows: count("SELECT COUNT(*) FROM strategy_params WHERE material_code <> 0")?,
                known_groups: count("SELECT COUNT(DISTINCT group_code) FROM material_groups")?,
                known_materials: count("SELECT COUNT(*) FROM material_groups")?,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DbStats {
    pub configured_groups: u64,
    pub material_rows: u64,
    pub known_groups: u64,
    pub known_materials: u64,
}

// Re-exports
pub use membership::{GroupMembership, InMemoryMembership, SqliteMembership};
pub use strategies::{StrategyFilter, StrategyRow, StrategyValues, UpdateResult, GROUP_DEFAULT_MATERIAL};

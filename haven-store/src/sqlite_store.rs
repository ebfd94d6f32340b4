//! SQLite-based resource storage
//!
//! Schema:
//!   - resources: Current version only (resource_type, id)
//!   - resource_history: Version history (resource_type, id, version_id)

use crate::error::Result;
use rusqlite::{params, Connection, Transaction};
use std::ops::Deref;
use std::path::Path;
use std::sync::Mutex;

/// SQLite-based resource store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

#[allow(clippy::result_large_err)]
impl SqliteStore {
    /// Open the store (create if not exists)
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for read-write concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        // Current version table
        conn.execute(
            "CREATE TABLE IF NOT EXISTS resources (
                resource_type TEXT NOT NULL,
                id TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (resource_type, id)
            )",
            [],
        )?;

        // History table
        conn.execute(
            "CREATE TABLE IF NOT EXISTS resource_history (
                resource_type TEXT NOT NULL,
                id TEXT NOT NULL,
                version_id TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (resource_type, id, version_id)
            )",
            [],
        )?;

        // Tombstones: records a (resource_type, id) as permanently deleted so
        // the id can never be reused for a different logical resource, and so
        // reads/searches can distinguish "never existed" from "was deleted".
        conn.execute(
            "CREATE TABLE IF NOT EXISTS tombstones (
                resource_type TEXT NOT NULL,
                id TEXT NOT NULL,
                last_version_id TEXT NOT NULL,
                deleted_at TEXT NOT NULL,
                PRIMARY KEY (resource_type, id)
            )",
            [],
        )?;

        // Create indexes
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_resources_type ON resources(resource_type)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_history_type ON resource_history(resource_type)",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Get a resource
    pub fn get(&self, resource_type: &str, id: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT value FROM resources WHERE resource_type = ? AND id = ?"
        )?;
        let result = stmt.query_row(params![resource_type, id], |row| row.get::<_, String>(0));

        match result {
            Ok(value) => Ok(Some(value.into_bytes())),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Store a resource (current version)
    pub fn put(&self, resource_type: &str, id: &str, data: &[u8]) -> Result<()> {
        let value = std::str::from_utf8(data)
            .map_err(|e| crate::error::StoreError::Other(format!("Invalid UTF-8: {}", e)))?;
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "INSERT OR REPLACE INTO resources (resource_type, id, value) VALUES (?, ?, ?)",
            params![resource_type, id, value],
        )?;

        Ok(())
    }

    /// Store a resource with version history
    pub fn put_with_version(
        &self,
        resource_type: &str,
        id: &str,
        version_id: &str,
        data: &[u8],
    ) -> Result<()> {
        let value = std::str::from_utf8(data)
            .map_err(|e| crate::error::StoreError::Other(format!("Invalid UTF-8: {}", e)))?;

        let conn = self.conn.lock().unwrap();

        // Save current version
        conn.execute(
            "INSERT OR REPLACE INTO resources (resource_type, id, value) VALUES (?, ?, ?)",
            params![resource_type, id, value],
        )?;

        // Save to history
        conn.execute(
            "INSERT OR REPLACE INTO resource_history (resource_type, id, version_id, value) VALUES (?, ?, ?, ?)",
            params![resource_type, id, version_id, value],
        )?;

        Ok(())
    }

    /// Get a specific version
    pub fn get_version(
        &self,
        resource_type: &str,
        id: &str,
        version_id: &str,
    ) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT value FROM resource_history WHERE resource_type = ? AND id = ? AND version_id = ?"
        )?;
        let result = stmt.query_row(params![resource_type, id, version_id], |row| row.get::<_, String>(0));

        match result {
            Ok(value) => Ok(Some(value.into_bytes())),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a resource (current version only, history is preserved)
    pub fn delete(&self, resource_type: &str, id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();

        let rows = conn.execute(
            "DELETE FROM resources WHERE resource_type = ? AND id = ?",
            params![resource_type, id]
        )?;
        Ok(rows > 0)
    }

    /// Delete a resource and record a tombstone so the id can never be
    /// reused for a different logical resource.
    pub fn delete_with_tombstone(
        &self,
        resource_type: &str,
        id: &str,
        last_version_id: &str,
    ) -> Result<bool> {
        let conn = self.conn.lock().unwrap();

        let rows = conn.execute(
            "DELETE FROM resources WHERE resource_type = ? AND id = ?",
            params![resource_type, id],
        )?;

        conn.execute(
            "INSERT OR REPLACE INTO tombstones (resource_type, id, last_version_id, deleted_at) VALUES (?, ?, ?, ?)",
            params![
                resource_type,
                id,
                last_version_id,
                chrono::Utc::now().to_rfc3339()
            ],
        )?;

        Ok(rows > 0)
    }

    /// Whether this (resource_type, id) was ever deleted.
    pub fn is_tombstoned(&self, resource_type: &str, id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT 1 FROM tombstones WHERE resource_type = ? AND id = ?",
        )?;
        Ok(stmt.exists(params![resource_type, id])?)
    }

    /// List version history (list of version_ids)
    pub fn list_versions(&self, resource_type: &str, id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT version_id FROM resource_history WHERE resource_type = ? AND id = ? ORDER BY version_id"
        )?;
        let rows = stmt.query_map(params![resource_type, id], |row| row.get::<_, String>(0))?;

        let mut versions = Vec::new();
        for version_id in rows {
            versions.push(version_id?);
        }

        Ok(versions)
    }

    /// Get resource counts by type
    pub fn count_by_type(&self) -> Result<Vec<(String, i64)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT resource_type, COUNT(*) FROM resources GROUP BY resource_type ORDER BY resource_type",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut counts = Vec::new();
        for row in rows {
            counts.push(row?);
        }
        Ok(counts)
    }

    /// List all resources (optionally filtered by resource type)
    pub fn list_all(&self, resource_type: Option<&str>) -> Result<Vec<(String, String, Vec<u8>)>> {
        let conn = self.conn.lock().unwrap();

        let mut results = Vec::new();

        if let Some(rt) = resource_type {
            let mut stmt = conn.prepare(
                "SELECT resource_type, id, value FROM resources WHERE resource_type = ? ORDER BY id",
            )?;
            let rows = stmt.query_map(params![rt], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;
            for row in rows {
                let (rt, id, val) = row?;
                results.push((rt, id, val.into_bytes()));
            }
        } else {
            let mut stmt = conn.prepare(
                "SELECT resource_type, id, value FROM resources ORDER BY resource_type, id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;
            for row in rows {
                let (rt, id, val) = row?;
                results.push((rt, id, val.into_bytes()));
            }
        }

        Ok(results)
    }

    /// Execute multiple operations atomically within an SQLite transaction
    pub fn in_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&TransactionOps<'_>) -> Result<T>,
    {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let ops = TransactionOps { tx: &tx };
        let result = f(&ops)?;
        tx.commit()?;
        Ok(result)
    }
}

/// Operations available within a transaction
pub struct TransactionOps<'a> {
    tx: &'a Transaction<'a>,
}

#[allow(clippy::result_large_err)]
impl<'a> TransactionOps<'a> {
    /// Store a resource with version history
    pub fn put_with_version(
        &self,
        resource_type: &str,
        id: &str,
        version_id: &str,
        data: &[u8],
    ) -> Result<()> {
        let value = std::str::from_utf8(data)
            .map_err(|e| crate::error::StoreError::Other(format!("Invalid UTF-8: {}", e)))?;
        let conn = self.tx.deref();

        conn.execute(
            "INSERT OR REPLACE INTO resources (resource_type, id, value) VALUES (?, ?, ?)",
            params![resource_type, id, value],
        )?;
        conn.execute(
            "INSERT OR REPLACE INTO resource_history (resource_type, id, version_id, value) VALUES (?, ?, ?, ?)",
            params![resource_type, id, version_id, value],
        )?;
        Ok(())
    }

    /// Get a resource
    pub fn get(&self, resource_type: &str, id: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.tx.deref();
        let mut stmt = conn.prepare(
            "SELECT value FROM resources WHERE resource_type = ? AND id = ?",
        )?;
        let result = stmt.query_row(params![resource_type, id], |row| row.get::<_, String>(0));
        match result {
            Ok(value) => Ok(Some(value.into_bytes())),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a resource (current version only, history is preserved)
    pub fn delete(&self, resource_type: &str, id: &str) -> Result<bool> {
        let conn = self.tx.deref();
        let rows = conn.execute(
            "DELETE FROM resources WHERE resource_type = ? AND id = ?",
            params![resource_type, id],
        )?;
        Ok(rows > 0)
    }

    /// Delete a resource and record a tombstone within the same transaction.
    pub fn delete_with_tombstone(
        &self,
        resource_type: &str,
        id: &str,
        last_version_id: &str,
    ) -> Result<bool> {
        let conn = self.tx.deref();
        let rows = conn.execute(
            "DELETE FROM resources WHERE resource_type = ? AND id = ?",
            params![resource_type, id],
        )?;
        conn.execute(
            "INSERT OR REPLACE INTO tombstones (resource_type, id, last_version_id, deleted_at) VALUES (?, ?, ?, ?)",
            params![
                resource_type,
                id,
                last_version_id,
                chrono::Utc::now().to_rfc3339()
            ],
        )?;
        Ok(rows > 0)
    }

    /// Whether this (resource_type, id) was ever deleted.
    pub fn is_tombstoned(&self, resource_type: &str, id: &str) -> Result<bool> {
        let conn = self.tx.deref();
        let mut stmt = conn.prepare(
            "SELECT 1 FROM tombstones WHERE resource_type = ? AND id = ?",
        )?;
        Ok(stmt.exists(params![resource_type, id])?)
    }
}

//! SQLite storage implementation

use std::path::Path;
use rusqlite::{params, ErrorCode, OptionalExtension, Transaction, TransactionBehavior};
use crate::{Error, Result};
use crate::mapper::EncodedObject;
use super::pool::{ConnectionPool, ConnectionSource};
use super::schema;

/// Default upper bound on pooled connections for file databases
pub const DEFAULT_MAX_CONNECTIONS: usize = 8;

/// A persisted entity row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRow {
    pub id: String,
    pub type_name: String,
    pub blob: String,
}

/// A declared property of a type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyType {
    pub name: String,
    pub indexed: bool,
}

/// Per-type object count
#[derive(Debug, Clone)]
pub struct TypeSummary {
    pub name: String,
    pub objects: usize,
}

/// SQLite-backed storage for arbitrary typed entities.
///
/// Each write touches one object row and its property rows inside a single
/// transaction, so the two tables never disagree after an error.
pub struct SqliteStore {
    pool: ConnectionPool,
}

impl SqliteStore {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, DEFAULT_MAX_CONNECTIONS, true)
    }

    /// Open a database file with an explicit pool size.
    /// With `init_db` false the schema is assumed to exist.
    pub fn open_with(path: &Path, max_connections: usize, init_db: bool) -> Result<Self> {
        let pool = ConnectionPool::new(ConnectionSource::File(path.to_path_buf()), max_connections)?;
        let store = Self { pool };
        if init_db {
            store.initialize_schema()?;
        }
        Ok(store)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            pool: ConnectionPool::new(ConnectionSource::Memory, 1)?,
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Initialize the database schema
    fn initialize_schema(&self) -> Result<()> {
        let mut conn = self.pool.acquire()?;
        schema::migrate(&mut conn)
    }

    /// Close all pooled connections; later calls fail with `Disposed`
    pub fn close(&self) {
        self.pool.close();
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    // ========== Object Operations ==========

    /// Insert a new object and its property rows
    pub fn insert(&self, object: &EncodedObject) -> Result<()> {
        let mut conn = self.pool.acquire()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let type_id = ensure_type(&tx, &object.type_name)?;

        let inserted = tx.execute(
            "INSERT INTO object (id, type_id, blob) VALUES (?1, ?2, ?3)",
            params![object.id, type_id, object.blob],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                return Err(Error::DuplicateId(object.id.clone()));
            }
            Err(e) => return Err(e.into()),
        }

        write_properties(&tx, type_id, object)?;
        tx.commit()?;
        tracing::debug!("Inserted {} {}", object.type_name, object.id);
        Ok(())
    }

    /// Overwrite an existing object and rewrite all of its property rows
    pub fn update(&self, object: &EncodedObject) -> Result<()> {
        let mut conn = self.pool.acquire()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let stored = stored_type(&tx, &object.id)?
            .ok_or_else(|| Error::NotFound(object.id.clone()))?;
        if stored != object.type_name {
            return Err(Error::TypeMismatch {
                id: object.id.clone(),
                stored,
                requested: object.type_name.clone(),
            });
        }

        let type_id = ensure_type(&tx, &object.type_name)?;
        tx.execute(
            "UPDATE object SET blob = ?2 WHERE id = ?1",
            params![object.id, object.blob],
        )?;
        tx.execute("DELETE FROM object_property WHERE id = ?1", [&object.id])?;
        write_properties(&tx, type_id, object)?;
        tx.commit()?;
        tracing::debug!("Updated {} {}", object.type_name, object.id);
        Ok(())
    }

    /// Get an object row by id
    pub fn select_by_id(&self, id: &str) -> Result<ObjectRow> {
        let conn = self.pool.acquire()?;
        conn.query_row(
            r#"
            SELECT o.id, t.typename, o.blob
            FROM object o JOIN "type" t ON t.oid = o.type_id
            WHERE o.id = ?1
            "#,
            [id],
            |row| {
                Ok(ObjectRow {
                    id: row.get(0)?,
                    type_name: row.get(1)?,
                    blob: row.get(2)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Ids of all objects of a type, sorted. Unknown types have no objects.
    pub fn select_ids_by_type(&self, type_name: &str) -> Result<Vec<String>> {
        let conn = self.pool.acquire()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT o.id FROM object o JOIN "type" t ON t.oid = o.type_id
            WHERE t.typename = ?1
            ORDER BY o.id
            "#,
        )?;

        let ids = stmt
            .query_map([type_name], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        Ok(ids)
    }

    /// Ids of objects of a type whose indexed property equals `value`.
    ///
    /// Fails with `NotFound` if the property is not an indexed property of
    /// the type; an empty list means no object matches.
    pub fn select_by_type_and_property(
        &self,
        type_name: &str,
        property: &str,
        value: &str,
    ) -> Result<Vec<String>> {
        let conn = self.pool.acquire()?;
        let property_type: Option<i64> = conn
            .query_row(
                r#"
                SELECT pt.oid FROM property_type pt JOIN "type" t ON t.oid = pt.type_id
                WHERE t.typename = ?1 AND pt.name = ?2 AND pt."indexed" = 1
                "#,
                [type_name, property],
                |row| row.get(0),
            )
            .optional()?;
        let property_type = property_type
            .ok_or_else(|| Error::NotFound(format!("indexed property {}.{}", type_name, property)))?;

        let mut stmt = conn.prepare(
            "SELECT DISTINCT id FROM object_property WHERE property_type = ?1 AND value = ?2 ORDER BY id",
        )?;
        let ids = stmt
            .query_map(params![property_type, value], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        Ok(ids)
    }

    /// Delete an object and all of its property rows
    pub fn delete_by_id(&self, id: &str) -> Result<()> {
        let mut conn = self.pool.acquire()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute("DELETE FROM object_property WHERE id = ?1", [id])?;
        let deleted = tx.execute("DELETE FROM object WHERE id = ?1", [id])?;
        if deleted == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        tx.commit()?;
        tracing::debug!("Deleted {}", id);
        Ok(())
    }

    /// Indexed property values stored for an object, by property name
    pub fn properties_of(&self, id: &str) -> Result<Vec<(String, String)>> {
        let conn = self.pool.acquire()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT pt.name, op.value
            FROM object_property op JOIN property_type pt ON pt.oid = op.property_type
            WHERE op.id = ?1
            ORDER BY pt.name
            "#,
        )?;
        let props = stmt
            .query_map([id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<(String, String)>>>()?;
        Ok(props)
    }

    // ========== Type Operations ==========

    /// All known types with their object counts
    pub fn list_types(&self) -> Result<Vec<TypeSummary>> {
        let conn = self.pool.acquire()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT t.typename, COUNT(o.oid)
            FROM "type" t LEFT JOIN object o ON o.type_id = t.oid
            GROUP BY t.oid
            ORDER BY t.typename
            "#,
        )?;
        let types = stmt
            .query_map([], |row| {
                let objects: i64 = row.get(1)?;
                Ok(TypeSummary {
                    name: row.get(0)?,
                    objects: objects as usize,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(types)
    }

    /// Declared properties of a type
    pub fn property_types(&self, type_name: &str) -> Result<Vec<PropertyType>> {
        let conn = self.pool.acquire()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT pt.name, pt."indexed"
            FROM property_type pt JOIN "type" t ON t.oid = pt.type_id
            WHERE t.typename = ?1
            ORDER BY pt.name
            "#,
        )?;
        let props = stmt
            .query_map([type_name], |row| {
                Ok(PropertyType {
                    name: row.get(0)?,
                    indexed: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(props)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        let conn = self.pool.acquire()?;
        let count = |table: &str| -> Result<usize> {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
            Ok(n as usize)
        };
        Ok(DbStats {
            types: count("\"type\"")?,
            property_types: count("property_type")?,
            objects: count("object")?,
            properties: count("object_property")?,
            schema_version: schema::schema_version(&conn)?,
        })
    }
}

/// Oid of a type, created on first use
fn ensure_type(tx: &Transaction, type_name: &str) -> Result<i64> {
    tx.execute(
        r#"INSERT OR IGNORE INTO "type" (typename) VALUES (?1)"#,
        [type_name],
    )?;
    let oid = tx.query_row(
        r#"SELECT oid FROM "type" WHERE typename = ?1"#,
        [type_name],
        |row| row.get(0),
    )?;
    Ok(oid)
}

/// Oid of a property definition, created on first use; the indexed flag
/// follows the latest declaration
fn ensure_property_type(tx: &Transaction, type_id: i64, name: &str, indexed: bool) -> Result<i64> {
    let mut insert = tx.prepare_cached(
        r#"INSERT OR IGNORE INTO property_type (type_id, name, "indexed") VALUES (?1, ?2, ?3)"#,
    )?;
    insert.execute(params![type_id, name, indexed])?;

    let mut flag = tx.prepare_cached(
        r#"UPDATE property_type SET "indexed" = ?3 WHERE type_id = ?1 AND name = ?2 AND "indexed" <> ?3"#,
    )?;
    flag.execute(params![type_id, name, indexed])?;

    let mut select = tx.prepare_cached(
        "SELECT oid FROM property_type WHERE type_id = ?1 AND name = ?2",
    )?;
    let oid = select.query_row(params![type_id, name], |row| row.get(0))?;
    Ok(oid)
}

fn stored_type(tx: &Transaction, id: &str) -> Result<Option<String>> {
    let stored = tx
        .query_row(
            r#"SELECT t.typename FROM object o JOIN "type" t ON t.oid = o.type_id WHERE o.id = ?1"#,
            [id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(stored)
}

fn write_properties(tx: &Transaction, type_id: i64, object: &EncodedObject) -> Result<()> {
    for property in &object.properties {
        let property_type = ensure_property_type(tx, type_id, &property.name, property.indexed)?;
        if let (true, Some(value)) = (property.indexed, &property.value) {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO object_property (id, property_type, value) VALUES (?1, ?2, ?3)",
            )?;
            stmt.execute(params![object.id, property_type, value])?;
        }
    }
    Ok(())
}

/// Database statistics
#[derive(Debug, Clone)]
pub struct DbStats {
    pub types: usize,
    pub property_types: usize,
    pub objects: usize,
    pub properties: usize,
    pub schema_version: i64,
}

impl std::fmt::Display for DbStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Database Statistics:")?;
        writeln!(f, "  Schema version: {}", self.schema_version)?;
        writeln!(f, "  Types: {}", self.types)?;
        writeln!(f, "  Property types: {}", self.property_types)?;
        writeln!(f, "  Objects: {}", self.objects)?;
        writeln!(f, "  Properties: {}", self.properties)
    }
}

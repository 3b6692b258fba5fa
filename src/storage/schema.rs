//! Database schema definitions

use rusqlite::{Connection, TransactionBehavior};
use crate::Result;

/// Version stamped into `PRAGMA user_version` once the schema is in place
pub const SCHEMA_VERSION: i64 = 1;

/// SQL to create the type table
pub const CREATE_TYPE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS "type" (
    oid INTEGER PRIMARY KEY AUTOINCREMENT,
    typename TEXT NOT NULL UNIQUE
)
"#;

/// SQL to create the property_type table
/// One row per (type, attribute) ever seen by the mapper
pub const CREATE_PROPERTY_TYPE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS property_type (
    oid INTEGER PRIMARY KEY AUTOINCREMENT,
    type_id INTEGER NOT NULL REFERENCES "type"(oid),
    name TEXT NOT NULL,
    "indexed" INTEGER NOT NULL DEFAULT 0,
    UNIQUE(type_id, name)
)
"#;

/// SQL to create the object table
pub const CREATE_OBJECT_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS object (
    oid INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    type_id INTEGER NOT NULL REFERENCES "type"(oid),
    blob TEXT NOT NULL
)
"#;

/// SQL to create the object_property table
pub const CREATE_OBJECT_PROPERTY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS object_property (
    oid INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL REFERENCES object(id) ON DELETE CASCADE,
    property_type INTEGER NOT NULL REFERENCES property_type(oid),
    value TEXT
)
"#;

/// SQL to create indexes
pub const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_object_type ON object(type_id)",
    "CREATE INDEX IF NOT EXISTS idx_object_property_id ON object_property(id)",
    "CREATE INDEX IF NOT EXISTS idx_object_property_value ON object_property(property_type, value)",
];

/// All schema creation statements
pub fn all_schema_statements() -> Vec<&'static str> {
    let mut stmts = vec![
        CREATE_TYPE_TABLE,
        CREATE_PROPERTY_TYPE_TABLE,
        CREATE_OBJECT_TABLE,
        CREATE_OBJECT_PROPERTY_TABLE,
    ];
    stmts.extend(CREATE_INDEXES.iter().copied());
    stmts
}

/// Current `user_version` of a database
pub fn schema_version(conn: &Connection) -> Result<i64> {
    let version = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(version)
}

/// Create or upgrade the schema. Safe to run against an initialized store.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    let version = schema_version(conn)?;
    if version > SCHEMA_VERSION {
        tracing::warn!(
            "Database schema version {} is newer than supported version {}",
            version,
            SCHEMA_VERSION
        );
        return Ok(());
    }
    if version == SCHEMA_VERSION {
        return Ok(());
    }

    tracing::info!("Migrating schema from version {} to {}", version, SCHEMA_VERSION);
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    for stmt in all_schema_statements() {
        tx.execute(stmt, [])?;
    }
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;
    Ok(())
}

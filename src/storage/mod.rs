//! Storage Layer - SQLite-backed persistence
//!
//! System of record is SQLite with tables:
//! - type(oid, typename)
//! - property_type(oid, type_id, name, indexed)
//! - object(oid, id, type_id, blob)
//! - object_property(oid, id, property_type, value)

pub mod pool;
pub mod schema;
pub mod sqlite;

pub use pool::{ConnectionPool, ConnectionSource, PooledConnection};
pub use sqlite::{SqliteStore, ObjectRow, PropertyType, TypeSummary, DbStats, DEFAULT_MAX_CONNECTIONS};

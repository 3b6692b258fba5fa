//! # configdb - Relational configuration object store
//!
//! Persists semi-structured configuration records into four generic SQLite
//! tables and serves reads from an in-process cache shared by request threads.
//!
//! configdb provides:
//! - A codec registry mapping any `serde` entity type onto `type`,
//!   `property_type`, `object` and `object_property`
//! - A concurrency-safe cache invalidated only by explicit commands or
//!   host change notifications
//! - `Proxy` handles that resolve entity references by id and compare by
//!   persisted state
//! - The `ConfigDatabase` facade tying it all together

pub mod info;
pub mod catalog;
pub mod mapper;
pub mod storage;
pub mod cache;
pub mod proxy;
pub mod listener;
pub mod database;
pub mod config;
pub mod ui;

// Re-exports for convenient access
pub use info::{Info, InfoRef};
pub use mapper::{CodecRegistry, EncodedObject, PropertyValue};
pub use storage::{ObjectRow, SqliteStore};
pub use cache::{CacheStats, ObjectCache};
pub use proxy::Proxy;
pub use listener::{ChangeEvent, ChangeListener, ChangeListenerRegistry};
pub use database::{AllOf, ConfigDatabase};

/// Result type alias for configdb operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for configdb operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Object has no id")]
    MissingId,

    #[error("Object already exists: {0}")]
    DuplicateId(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unknown type: {0}")]
    UnknownType(String),

    #[error("Object {id} is stored as {stored}, not {requested}")]
    TypeMismatch {
        id: String,
        stored: String,
        requested: String,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database has been disposed")]
    Disposed,
}

impl Error {
    /// Caller-side precondition violations, raised before any I/O
    pub fn is_precondition(&self) -> bool {
        matches!(self, Error::MissingId | Error::DuplicateId(_))
    }

    /// True for missing ids, types and properties
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

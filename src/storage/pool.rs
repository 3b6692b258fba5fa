//! Connection pool
//!
//! Thin layer over `r2d2` that knows where connections point and can be
//! closed. Every connection has foreign keys enabled so deleting an object
//! cascades to its property rows. An in-memory database lives inside its
//! single connection, so the memory source is capped at one connection that
//! never idles out.

use std::path::PathBuf;
use std::sync::PoisonError;
use std::time::Duration;
use crossbeam::sync::ShardedLock;
use r2d2_sqlite::SqliteConnectionManager;
use crate::{Error, Result};

/// How long `acquire` waits for a free connection
const CHECKOUT_TIMEOUT: Duration = Duration::from_secs(30);

/// A checked-out connection; goes back to the pool when dropped
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

type Pool = r2d2::Pool<SqliteConnectionManager>;

/// Where pooled connections point
#[derive(Debug, Clone)]
pub enum ConnectionSource {
    File(PathBuf),
    Memory,
}

impl ConnectionSource {
    fn manager(&self) -> SqliteConnectionManager {
        let manager = match self {
            ConnectionSource::File(path) => SqliteConnectionManager::file(path),
            ConnectionSource::Memory => SqliteConnectionManager::memory(),
        };
        manager.with_init(|conn| conn.pragma_update(None, "foreign_keys", true))
    }
}

/// Pool of SQLite connections to one database
pub struct ConnectionPool {
    source: ConnectionSource,
    max_size: u32,
    /// `None` once closed
    pool: ShardedLock<Option<Pool>>,
}

impl ConnectionPool {
    pub fn new(source: ConnectionSource, max_size: usize) -> Result<Self> {
        let builder = Pool::builder().connection_timeout(CHECKOUT_TIMEOUT);
        let (pool, max_size) = match source {
            ConnectionSource::Memory => {
                let pool = builder
                    .max_size(1)
                    .min_idle(Some(1))
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .build(source.manager())?;
                (pool, 1)
            }
            ConnectionSource::File(_) => {
                let max_size = u32::try_from(max_size.max(1)).unwrap_or(u32::MAX);
                let pool = builder
                    .max_size(max_size)
                    .min_idle(Some(0))
                    .build(source.manager())?;
                (pool, max_size)
            }
        };
        tracing::debug!("Connection pool for {:?} (max {})", source, max_size);
        Ok(Self {
            source,
            max_size,
            pool: ShardedLock::new(Some(pool)),
        })
    }

    pub fn source(&self) -> &ConnectionSource {
        &self.source
    }

    pub fn max_size(&self) -> usize {
        self.max_size as usize
    }

    fn current(&self) -> Result<Pool> {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(Error::Disposed)
    }

    /// Take a connection, waiting for a release when all are checked out
    pub fn acquire(&self) -> Result<PooledConnection> {
        Ok(self.current()?.get()?)
    }

    /// Refuse further acquisitions and let go of the pool. Idle connections
    /// close now; checked-out ones close when returned.
    pub fn close(&self) {
        let pool = self.pool.write().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(pool) = pool {
            tracing::debug!("Closing pool with {} connection(s)", pool.state().connections);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.pool.read().unwrap_or_else(PoisonError::into_inner).is_none()
    }

    /// Connections currently open, idle or checked out
    pub fn open_connections(&self) -> usize {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, |pool| pool.state().connections as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_memory_pool_reuses_single_connection() {
        let pool = ConnectionPool::new(ConnectionSource::Memory, 8).unwrap();
        assert_eq!(pool.max_size(), 1);

        {
            let conn = pool.acquire().unwrap();
            conn.execute("CREATE TABLE t (x INTEGER)", []).unwrap();
        }
        let conn = pool.acquire().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 0);
        assert_eq!(pool.open_connections(), 1);
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let pool = ConnectionPool::new(ConnectionSource::Memory, 1).unwrap();
        let conn = pool.acquire().unwrap();
        let on: bool = conn.pragma_query_value(None, "foreign_keys", |r| r.get(0)).unwrap();
        assert!(on);
    }

    #[test]
    fn test_release_on_error_path() {
        let pool = ConnectionPool::new(ConnectionSource::Memory, 1).unwrap();
        let failing = || -> Result<()> {
            let conn = pool.acquire()?;
            conn.execute("SELECT * FROM missing_table", [])?;
            Ok(())
        };
        assert!(failing().is_err());
        // the single connection came back
        assert!(pool.acquire().is_ok());
    }

    #[test]
    fn test_waits_for_release() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(
            ConnectionPool::new(ConnectionSource::File(dir.path().join("pool.db")), 2).unwrap(),
        );

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    let conn = pool.acquire().unwrap();
                    let one: i64 = conn.query_row("SELECT 1", [], |r| r.get(0)).unwrap();
                    one
                })
            })
            .collect();

        for h in handles {
            assert_eq!(h.join().unwrap(), 1);
        }
        assert!(pool.open_connections() <= 2);
    }

    #[test]
    fn test_close_rejects_acquire() {
        let pool = ConnectionPool::new(ConnectionSource::Memory, 1).unwrap();
        drop(pool.acquire().unwrap());
        pool.close();
        pool.close();
        assert!(pool.is_closed());
        assert!(matches!(pool.acquire(), Err(Error::Disposed)));
        assert_eq!(pool.open_connections(), 0);
    }
}

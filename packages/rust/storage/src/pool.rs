//! Bounded pool of reader connections.

use std::ops::Deref;
use std::sync::Mutex;

use campusbot_shared::{CampusBotError, Result};
use libsql::Connection;
use tokio::sync::{MutexGuard, Semaphore, SemaphorePermit};

/// Hands out at most one checked-out reader per connection.
pub(crate) struct ReaderPool {
    idle: Mutex<Vec<Connection>>,
    permits: Semaphore,
}

impl ReaderPool {
    pub(crate) fn new(conns: Vec<Connection>) -> Self {
        let size = conns.len();
        Self {
            idle: Mutex::new(conns),
            permits: Semaphore::new(size),
        }
    }

    /// Wait for a free reader.
    pub(crate) async fn acquire(&self) -> Result<PooledReader<'_>> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| CampusBotError::Unavailable("reader pool closed".into()))?;

        let conn = self
            .idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop()
            .ok_or_else(|| CampusBotError::Storage("reader pool exhausted".into()))?;

        Ok(PooledReader {
            conn,
            pool: self,
            _permit: permit,
        })
    }
}

/// A checked-out reader; returned to the pool on drop.
pub(crate) struct PooledReader<'a> {
    conn: Connection,
    pool: &'a ReaderPool,
    _permit: SemaphorePermit<'a>,
}

impl Deref for PooledReader<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl Drop for PooledReader<'_> {
    fn drop(&mut self) {
        self.pool
            .idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(self.conn.clone());
    }
}

/// Connection a read runs on.
///
/// An in-memory database exists only on the connection that created it, so
/// in-memory stores read through the writer and wait out any open write
/// transaction instead of seeing its uncommitted rows.
pub(crate) enum ReadHandle<'a> {
    Pooled(PooledReader<'a>),
    Writer(MutexGuard<'a, Connection>),
}

impl Deref for ReadHandle<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        match self {
            Self::Pooled(reader) => reader,
            Self::Writer(guard) => guard,
        }
    }
}

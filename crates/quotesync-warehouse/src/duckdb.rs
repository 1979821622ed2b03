//! `DuckDB` connection pooling.
//!
//! A single database instance is opened once; every pooled connection is a
//! `try_clone` of that root handle so all of them share the same file lock.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ::duckdb::Connection;

struct PoolInner {
    location: Option<PathBuf>,
    max_idle: usize,
    root: Mutex<Connection>,
    idle: Mutex<Vec<Connection>>,
}

/// Hands out connections that share one `DuckDB` database instance.
#[derive(Clone)]
pub struct DuckDbConnectionManager {
    inner: Arc<PoolInner>,
}

impl DuckDbConnectionManager {
    /// Open (or create) the database file at `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or configured.
    pub fn open(path: impl Into<PathBuf>, max_idle: usize) -> Result<Self, ::duckdb::Error> {
        let path = path.into();
        let root = Connection::open(&path)?;
        Self::from_root(root, Some(path), max_idle)
    }

    /// Open a private in-memory database. Used by tests and dry runs.
    ///
    /// # Errors
    /// Returns an error if `DuckDB` cannot allocate the database.
    pub fn open_in_memory(max_idle: usize) -> Result<Self, ::duckdb::Error> {
        let root = Connection::open_in_memory()?;
        Self::from_root(root, None, max_idle)
    }

    fn from_root(
        root: Connection,
        location: Option<PathBuf>,
        max_idle: usize,
    ) -> Result<Self, ::duckdb::Error> {
        configure_connection(&root)?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                location,
                max_idle: max_idle.max(1),
                root: Mutex::new(root),
                idle: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Take an idle connection or clone a fresh one from the root handle.
    ///
    /// # Errors
    /// Returns an error if cloning or configuring a new connection fails.
    ///
    /// # Panics
    /// Panics if a pool mutex is poisoned.
    pub fn acquire(&self) -> Result<PooledConnection, ::duckdb::Error> {
        let reused = self
            .inner
            .idle
            .lock()
            .expect("duckdb idle pool mutex poisoned")
            .pop();

        let connection = match reused {
            Some(connection) => connection,
            None => {
                let root = self
                    .inner
                    .root
                    .lock()
                    .expect("duckdb root connection mutex poisoned");
                let connection = root.try_clone()?;
                configure_connection(&connection)?;
                connection
            }
        };

        Ok(PooledConnection {
            pool: Arc::clone(&self.inner),
            connection: Some(connection),
        })
    }

    /// Database file location; `None` for in-memory databases.
    #[must_use]
    pub fn location(&self) -> Option<&Path> {
        self.inner.location.as_deref()
    }

    /// Number of connections currently parked in the pool.
    #[must_use]
    pub fn idle_len(&self) -> usize {
        self.inner
            .idle
            .lock()
            .expect("duckdb idle pool mutex poisoned")
            .len()
    }
}

/// A connection that returns to the pool when dropped.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    connection: Option<Connection>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        self.connection
            .as_ref()
            .expect("pooled connection unexpectedly missing")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection
            .as_mut()
            .expect("pooled connection unexpectedly missing")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        let mut idle = self
            .pool
            .idle
            .lock()
            .expect("duckdb idle pool mutex poisoned");
        if idle.len() < self.pool.max_idle {
            idle.push(connection);
        }
    }
}

fn configure_connection(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch("PRAGMA disable_progress_bar;")
}

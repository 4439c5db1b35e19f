//! Process-wide pool of long-lived partition handles.
//!
//! Acquisition is lazy: the first request for a path opens the file with the
//! tuned pragmas; later requests get the same handle back. Handles are never
//! closed during process lifetime except by `close_all`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rusqlite::Connection;

use crate::error::{EngineError, Result};

/// One pooled handle. A handle serves one logical query at a time; the
/// mutex enforces that attached aliases never overlap between queries.
pub type Handle = Arc<Mutex<Connection>>;

/// Prepared statements cached per connection, keyed by statement text.
const STATEMENT_CACHE_CAPACITY: usize = 64;

pub struct ConnectionPool {
    handles: DashMap<PathBuf, Handle>,
    db_key: String,
}

impl ConnectionPool {
    pub fn new(db_key: String) -> Self {
        Self {
            handles: DashMap::new(),
            db_key,
        }
    }

    /// At-most-one handle per path. If a handle is already open it is
    /// returned regardless of earlier settings.
    pub fn acquire(&self, path: &Path) -> Result<Handle> {
        match self.handles.entry(path.to_path_buf()) {
            Entry::Occupied(e) => Ok(e.get().clone()),
            Entry::Vacant(v) => {
                let conn = open_tuned(path, &self.db_key)?;
                Ok(v.insert(Arc::new(Mutex::new(conn))).clone())
            }
        }
    }

    /// Lock a handle for one logical query.
    pub fn lock(handle: &Handle) -> Result<std::sync::MutexGuard<'_, Connection>> {
        handle
            .lock()
            .map_err(|_| EngineError::Internal("partition handle poisoned".to_string()))
    }

    pub fn open_count(&self) -> usize {
        self.handles.len()
    }

    /// Whether a handle for this path is already warm in the pool.
    pub fn is_open(&self, path: &Path) -> bool {
        self.handles.contains_key(path)
    }

    /// Teardown: close every handle, logging (not surfacing) failures.
    pub fn close_all(&self) {
        let paths: Vec<PathBuf> = self.handles.iter().map(|e| e.key().clone()).collect();
        for path in paths {
            if let Some((_, handle)) = self.handles.remove(&path) {
                match Arc::try_unwrap(handle) {
                    Ok(mutex) => {
                        if let Ok(conn) = mutex.into_inner() {
                            if let Err((_conn, e)) = conn.close() {
                                tracing::warn!(path = %path.display(), error = %e, "close failed");
                            }
                        }
                    }
                    Err(_) => {
                        tracing::warn!(path = %path.display(), "handle still borrowed at teardown");
                    }
                }
            }
        }
    }
}

/// Open with the partition tuning set. A pragma failure fails the open.
fn open_tuned(path: &Path, db_key: &str) -> Result<Connection> {
    let conn = Connection::open(path)
        .map_err(|e| EngineError::Internal(format!("open {}: {e}", path.display())))?;
    // PRAGMA key is a no-op unless the build links an encrypting SQLite.
    let key = db_key.replace('\'', "''");
    conn.execute_batch(&format!(
        "PRAGMA key = '{key}';\n\
         PRAGMA page_size = 4096;\n\
         PRAGMA journal_mode = WAL;\n\
         PRAGMA synchronous = NORMAL;\n\
         PRAGMA cache_size = 100000;\n\
         PRAGMA temp_store = MEMORY;\n\
         PRAGMA mmap_size = 268435456;\n\
         PRAGMA auto_vacuum = INCREMENTAL;"
    ))
    .map_err(|e| EngineError::Internal(format!("pragma setup for {}: {e}", path.display())))?;
    conn.set_prepared_statement_cache_capacity(STATEMENT_CACHE_CAPACITY);
    Ok(conn)
}

use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::{Condvar, Mutex};

use rusqlite::Connection;

use crate::Result;
use crate::models;

/// Bounded SQLite connection pool. Connections are checked out under a
/// lock + condvar; `get` blocks until one is free, `try_get` never waits.
/// No connection is ever shared across concurrent operations.
pub struct Db {
    pool: Mutex<Vec<Connection>>,
    cond: Condvar,
}

impl Db {
    /// Opens `pool_size` connections and creates the schema if missing.
    pub fn open(path: &Path, pool_size: usize) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let mut conns = Vec::with_capacity(pool_size.max(1));
        for _ in 0..pool_size.max(1) {
            conns.push(open_one(path)?);
        }

        models::init_schema(&conns[0])?;

        Ok(Self {
            pool: Mutex::new(conns),
            cond: Condvar::new(),
        })
    }

    /// Checks a connection out, blocking until one is available.
    pub fn get(&self) -> PooledConn<'_> {
        let mut pool = self.pool.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(conn) = pool.pop() {
                return PooledConn { db: self, conn: Some(conn) };
            }

            pool = self.cond.wait(pool).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Non-waiting checkout. Returns `None` when the pool is empty.
    pub fn try_get(&self) -> Option<PooledConn<'_>> {
        let mut pool = self.pool.lock().unwrap_or_else(|e| e.into_inner());
        pool.pop().map(|conn| PooledConn { db: self, conn: Some(conn) })
    }
}

fn open_one(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")?;
    Ok(conn)
}

/// A checked-out connection; returned to the pool on drop.
pub struct PooledConn<'a> {
    db: &'a Db,
    conn: Option<Connection>,
}

impl Deref for PooledConn<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().unwrap()
    }
}

impl DerefMut for PooledConn<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().unwrap()
    }
}

impl Drop for PooledConn<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let mut pool = self.db.pool.lock().unwrap_or_else(|e| e.into_inner());
            pool.push(conn);
            self.db.cond.notify_one();
        }
    }
}

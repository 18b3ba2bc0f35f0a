//! SQLite connection provider.
//!
//! `rusqlite` statements borrow their connection, so an open cursor cannot
//! be handed back to the caller directly. Each cursor instead runs on a
//! worker thread that owns one pooled connection for the cursor's lifetime
//! and answers fetch requests over channels. Closing the cursor stops the
//! worker and returns the connection to the pool.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, ToSql};
use tracing::{debug, trace, warn};

use crate::backend::{ConnectionProvider, IsolationMode, RowCursor};
use crate::error::{AqlError, Result};
use crate::query::dialect::Dialect;
use crate::query::fields::ItemType;
use crate::query::value::Value;

const DEFAULT_MAX_IDLE: usize = 4;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// DDL for the repository-metadata schema the compiler targets.
pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS nodes (
    node_id INTEGER PRIMARY KEY,
    node_type INTEGER NOT NULL,
    repo TEXT NOT NULL,
    node_path TEXT NOT NULL,
    node_name TEXT NOT NULL,
    depth INTEGER NOT NULL,
    created INTEGER NOT NULL,
    created_by TEXT,
    modified INTEGER NOT NULL,
    modified_by TEXT,
    updated INTEGER NOT NULL,
    bin_length INTEGER,
    sha1_actual TEXT,
    sha1_original TEXT,
    md5_actual TEXT,
    md5_original TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS nodes_repo_path_name ON nodes (repo, node_path, node_name);
CREATE INDEX IF NOT EXISTS nodes_sha1 ON nodes (sha1_actual);
CREATE TABLE IF NOT EXISTS binaries (
    sha1 TEXT PRIMARY KEY,
    md5 TEXT,
    sha256 TEXT,
    bin_length INTEGER
);
CREATE TABLE IF NOT EXISTS node_props (
    prop_id INTEGER PRIMARY KEY,
    node_id INTEGER NOT NULL REFERENCES nodes (node_id),
    prop_key TEXT NOT NULL,
    prop_value TEXT
);
CREATE INDEX IF NOT EXISTS node_props_node ON node_props (node_id);
CREATE INDEX IF NOT EXISTS node_props_key_value ON node_props (prop_key, prop_value);
";

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Bool(v) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(i64::from(*v))),
            Value::Int(v) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*v)),
            Value::Float(v) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*v)),
            Value::String(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
        })
    }
}

fn value_from_sql(value: ValueRef<'_>) -> Result<Value> {
    match value {
        ValueRef::Null => Ok(Value::Null),
        ValueRef::Integer(v) => Ok(Value::Int(v)),
        ValueRef::Real(v) => Ok(Value::Float(v)),
        ValueRef::Text(bytes) => Ok(Value::String(String::from_utf8_lossy(bytes).into_owned())),
        ValueRef::Blob(_) => Err(AqlError::execution("blob columns are not supported")),
    }
}

struct Pool {
    path: PathBuf,
    idle: Mutex<Vec<Connection>>,
    max_idle: usize,
    checked_out: AtomicUsize,
}

impl Pool {
    fn open_connection(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.pragma_update(None, "case_sensitive_like", true)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(conn)
    }

    fn checkout(self: &Arc<Self>) -> Result<PooledConnection> {
        let reused = self.idle.lock().pop();
        let conn = match reused {
            Some(conn) => conn,
            None => self.open_connection()?,
        };
        self.checked_out.fetch_add(1, Ordering::SeqCst);
        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(self),
        })
    }

    fn release(&self, conn: Connection) {
        self.checked_out.fetch_sub(1, Ordering::SeqCst);
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(conn);
        }
    }
}

/// A connection that goes back to its pool when dropped.
struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<Pool>,
}

impl PooledConnection {
    fn conn(&self) -> Result<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| AqlError::execution("pooled connection already released"))
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

/// Fixture row for the `nodes` table.
#[derive(Debug, Clone)]
pub struct NewItem {
    /// Repository key.
    pub repo: String,
    /// Parent folder path, `.` for the root.
    pub path: String,
    /// Item name.
    pub name: String,
    /// File or folder.
    pub item_type: ItemType,
    /// Binary length; `None` for folders.
    pub size: Option<i64>,
    /// Creation/modification/update time in ms since the epoch.
    pub timestamp: i64,
    /// Creating and modifying user.
    pub user: Option<String>,
    /// Binary sha1; also links the `binaries` row.
    pub sha1: Option<String>,
    /// Binary md5.
    pub md5: Option<String>,
    /// Binary sha256, stored in `binaries`.
    pub sha256: Option<String>,
}

impl NewItem {
    /// A file with no binary metadata yet.
    pub fn file(repo: &str, path: &str, name: &str) -> Self {
        Self {
            repo: repo.to_owned(),
            path: path.to_owned(),
            name: name.to_owned(),
            item_type: ItemType::File,
            size: Some(0),
            timestamp: 0,
            user: None,
            sha1: None,
            md5: None,
            sha256: None,
        }
    }

    /// A folder.
    pub fn folder(repo: &str, path: &str, name: &str) -> Self {
        Self {
            item_type: ItemType::Folder,
            size: None,
            ..Self::file(repo, path, name)
        }
    }

    /// Sets the binary length.
    pub fn with_size(mut self, size: i64) -> Self {
        self.size = Some(size);
        self
    }

    /// Sets all timestamps.
    pub fn at(mut self, timestamp_ms: i64) -> Self {
        self.timestamp = timestamp_ms;
        self
    }

    /// Sets the creating/modifying user.
    pub fn by(mut self, user: &str) -> Self {
        self.user = Some(user.to_owned());
        self
    }

    /// Sets checksums; `sha256` lands in the `binaries` table.
    pub fn with_checksums(mut self, sha1: &str, md5: &str, sha256: &str) -> Self {
        self.sha1 = Some(sha1.to_owned());
        self.md5 = Some(md5.to_owned());
        self.sha256 = Some(sha256.to_owned());
        self
    }

    fn depth(&self) -> i64 {
        match self.path.trim_matches('/') {
            "" | "." => 1,
            path => path.split('/').count() as i64 + 1,
        }
    }
}

/// SQLite-backed [`ConnectionProvider`].
pub struct SqliteProvider {
    pool: Arc<Pool>,
    /// Threads currently inside an outer unit of work.
    transactions: Mutex<HashSet<ThreadId>>,
}

impl SqliteProvider {
    /// Opens (or creates) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let provider = Self {
            pool: Arc::new(Pool {
                path: path.as_ref().to_path_buf(),
                idle: Mutex::new(Vec::new()),
                max_idle: DEFAULT_MAX_IDLE,
                checked_out: AtomicUsize::new(0),
            }),
            transactions: Mutex::new(HashSet::new()),
        };
        // fail fast on an unreadable path
        drop(provider.pool.checkout()?);
        Ok(provider)
    }

    /// Creates the schema if it does not exist.
    pub fn create_schema(&self) -> Result<()> {
        let conn = self.pool.checkout()?;
        conn.conn()?.execute_batch(SCHEMA)?;
        debug!(path = %self.pool.path.display(), "schema ready");
        Ok(())
    }

    /// Inserts an item and its binary row, returning the new `node_id`.
    pub fn insert_item(&self, item: &NewItem) -> Result<i64> {
        let pooled = self.pool.checkout()?;
        let conn = pooled.conn()?;
        if let Some(sha1) = &item.sha1 {
            conn.execute(
                "INSERT OR IGNORE INTO binaries (sha1, md5, sha256, bin_length) VALUES (?1, ?2, ?3, ?4)",
                params![sha1, item.md5, item.sha256, item.size],
            )?;
        }
        conn.execute(
            "INSERT INTO nodes (node_type, repo, node_path, node_name, depth, created, created_by,
                modified, modified_by, updated, bin_length, sha1_actual, sha1_original,
                md5_actual, md5_original)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?6, ?7, ?6, ?8, ?9, ?9, ?10, ?10)",
            params![
                item.item_type.code(),
                item.repo,
                item.path,
                item.name,
                item.depth(),
                item.timestamp,
                item.user,
                item.size,
                item.sha1,
                item.md5,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Adds one property row to an item.
    pub fn set_property(&self, node_id: i64, key: &str, value: &str) -> Result<()> {
        let pooled = self.pool.checkout()?;
        pooled.conn()?.execute(
            "INSERT INTO node_props (node_id, prop_key, prop_value) VALUES (?1, ?2, ?3)",
            params![node_id, key, value],
        )?;
        Ok(())
    }

    /// Looks up an item id by its coordinates.
    pub fn find_item(&self, repo: &str, path: &str, name: &str) -> Result<Option<i64>> {
        let pooled = self.pool.checkout()?;
        let id = pooled
            .conn()?
            .query_row(
                "SELECT node_id FROM nodes WHERE repo = ?1 AND node_path = ?2 AND node_name = ?3",
                params![repo, path, name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Connections currently held by open cursors or helper calls.
    pub fn checked_out(&self) -> usize {
        self.pool.checked_out.load(Ordering::SeqCst)
    }

    /// Marks whether the calling thread runs inside an outer unit of work.
    ///
    /// Other threads using the same provider keep their own state.
    pub fn set_in_transaction(&self, active: bool) {
        let current = thread::current().id();
        let mut transactions = self.transactions.lock();
        if active {
            transactions.insert(current);
        } else {
            transactions.remove(&current);
        }
    }
}

impl ConnectionProvider for SqliteProvider {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn in_transaction(&self) -> bool {
        self.transactions.lock().contains(&thread::current().id())
    }

    fn execute_select(
        &self,
        sql: &str,
        params: &[Value],
        isolation: IsolationMode,
    ) -> Result<Box<dyn RowCursor>> {
        let pooled = self.pool.checkout()?;
        let job = CursorJob {
            sql: sql.to_owned(),
            params: params.to_vec(),
            isolation,
        };
        let (request_tx, request_rx) = mpsc::channel();
        let (reply_tx, reply_rx) = mpsc::channel();
        let worker = thread::Builder::new()
            .name("aql-sqlite-cursor".into())
            .spawn(move || cursor_worker(pooled, job, request_rx, reply_tx))
            .map_err(|err| AqlError::backend("failed to spawn cursor worker", err))?;
        let mut cursor = SqliteCursor {
            requests: request_tx,
            replies: reply_rx,
            worker: Some(worker),
        };
        match cursor.replies.recv() {
            Ok(CursorReply::Opened(Ok(()))) => Ok(Box::new(cursor)),
            Ok(CursorReply::Opened(Err(err))) | Ok(CursorReply::Row(Err(err))) => {
                let _ = cursor.close();
                Err(err)
            }
            Ok(CursorReply::Row(Ok(_))) => {
                let _ = cursor.close();
                Err(AqlError::execution("cursor worker answered before opening"))
            }
            Err(_) => {
                let _ = cursor.close();
                Err(AqlError::execution("cursor worker exited while opening"))
            }
        }
    }
}

struct CursorJob {
    sql: String,
    params: Vec<Value>,
    isolation: IsolationMode,
}

enum CursorRequest {
    Fetch,
    Close,
}

enum CursorReply {
    Opened(Result<()>),
    Row(Result<Option<Vec<Value>>>),
}

fn cursor_worker(
    pooled: PooledConnection,
    job: CursorJob,
    requests: Receiver<CursorRequest>,
    replies: Sender<CursorReply>,
) {
    let conn = match pooled.conn() {
        Ok(conn) => conn,
        Err(err) => {
            let _ = replies.send(CursorReply::Opened(Err(err)));
            return;
        }
    };
    let snapshot = job.isolation == IsolationMode::ConsistentRead;
    if snapshot {
        if let Err(err) = conn.execute_batch("BEGIN DEFERRED") {
            let _ = replies.send(CursorReply::Opened(Err(err.into())));
            return;
        }
    }
    serve_rows(conn, &job, &requests, &replies);
    if snapshot {
        if let Err(err) = conn.execute_batch("COMMIT") {
            warn!(error = %err, "failed to end consistent-read transaction");
        }
    }
    trace!("cursor worker finished");
}

fn serve_rows(
    conn: &Connection,
    job: &CursorJob,
    requests: &Receiver<CursorRequest>,
    replies: &Sender<CursorReply>,
) {
    let mut statement = match conn.prepare(&job.sql) {
        Ok(statement) => statement,
        Err(err) => {
            let _ = replies.send(CursorReply::Opened(Err(err.into())));
            return;
        }
    };
    let column_count = statement.column_count();
    let mut rows = match statement.query(params_from_iter(job.params.iter())) {
        Ok(rows) => rows,
        Err(err) => {
            let _ = replies.send(CursorReply::Opened(Err(err.into())));
            return;
        }
    };
    if replies.send(CursorReply::Opened(Ok(()))).is_err() {
        return;
    }
    // a dropped request sender means the cursor went away without closing
    while let Ok(CursorRequest::Fetch) = requests.recv() {
        let reply = match rows.next() {
            Ok(Some(row)) => (0..column_count)
                .map(|index| {
                    row.get_ref(index)
                        .map_err(AqlError::from)
                        .and_then(value_from_sql)
                })
                .collect::<Result<Vec<_>>>()
                .map(Some),
            Ok(None) => Ok(None),
            Err(err) => Err(err.into()),
        };
        if replies.send(CursorReply::Row(reply)).is_err() {
            return;
        }
    }
}

/// Cursor handle; the statement lives on the worker thread.
struct SqliteCursor {
    requests: Sender<CursorRequest>,
    replies: Receiver<CursorReply>,
    worker: Option<JoinHandle<()>>,
}

impl RowCursor for SqliteCursor {
    fn next_row(&mut self) -> Result<Option<Vec<Value>>> {
        if self.worker.is_none() {
            return Err(AqlError::execution("cursor is closed"));
        }
        self.requests
            .send(CursorRequest::Fetch)
            .map_err(|_| AqlError::execution("cursor worker exited"))?;
        match self.replies.recv() {
            Ok(CursorReply::Row(row)) => row,
            Ok(CursorReply::Opened(_)) => Err(AqlError::execution("unexpected cursor reply")),
            Err(_) => Err(AqlError::execution("cursor worker exited")),
        }
    }

    fn close(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        let _ = self.requests.send(CursorRequest::Close);
        worker
            .join()
            .map_err(|_| AqlError::execution("cursor worker panicked"))
    }
}

impl Drop for SqliteCursor {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "failed to close sqlite cursor");
        }
    }
}

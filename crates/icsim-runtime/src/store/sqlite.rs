//! Embedded SQL file store.

use std::fs;
use std::path::PathBuf;
use std::time::Duration as StdDuration;

use parking_lot::Mutex;
use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use smol_str::SmolStr;

use crate::error::RuntimeError;
use crate::value::TagValue;

use super::{ensure_finite, Store, StoreKind};

const BUSY_TIMEOUT: StdDuration = StdDuration::from_secs(1);

/// One table `(name TEXT PRIMARY KEY, value)` in a SQLite file.
///
/// SQLite's own locking makes each statement atomic across processes.
#[derive(Debug)]
pub struct SqliteStore {
    path: PathBuf,
    table: SmolStr,
    conn: Mutex<Option<Connection>>,
}

impl SqliteStore {
    /// `table` must be a plain identifier; descriptors validate it.
    pub fn new(path: impl Into<PathBuf>, table: impl Into<SmolStr>) -> Self {
        Self {
            path: path.into(),
            table: table.into(),
            conn: Mutex::new(None),
        }
    }

    fn open(&self) -> Result<Connection, RuntimeError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| {
                RuntimeError::store(format!("create {}: {err}", parent.display()))
            })?;
        }
        let conn = Connection::open(&self.path)
            .map_err(|err| RuntimeError::store(format!("open {}: {err}", self.path.display())))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|err| RuntimeError::store(format!("busy timeout: {err}")))?;
        Ok(conn)
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, RuntimeError> {
        let mut guard = self.conn.lock();
        if guard.is_none() {
            *guard = Some(self.open()?);
        }
        let Some(conn) = guard.as_ref() else {
            return Err(RuntimeError::store("sqlite connection unavailable"));
        };
        let result = f(conn).map_err(|err| RuntimeError::store(format!("sqlite: {err}")));
        if result.is_err() {
            // Reopen on the next call in case the file was swapped underneath us.
            *guard = None;
        }
        result
    }
}

impl Store for SqliteStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Sqlite
    }

    fn initialize(
        &self,
        initial: &[(SmolStr, TagValue)],
        clear_existing: bool,
    ) -> Result<(), RuntimeError> {
        for (key, value) in initial {
            ensure_finite(key, value)?;
        }
        if clear_existing {
            let mut guard = self.conn.lock();
            *guard = None;
            if self.path.is_file() {
                fs::remove_file(&self.path).map_err(|err| {
                    RuntimeError::store(format!("remove {}: {err}", self.path.display()))
                })?;
            }
        }
        let table = self.table.clone();
        self.with_conn(|conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (name TEXT NOT NULL PRIMARY KEY, value);"
            ))?;
            let tx = conn.unchecked_transaction()?;
            {
                let mut insert = tx.prepare(&format!(
                    "INSERT INTO {table} (name, value) VALUES (?1, ?2) \
                     ON CONFLICT(name) DO UPDATE SET value = excluded.value"
                ))?;
                for (key, value) in initial {
                    insert.execute(params![key.as_str(), SqlTagValue(value)])?;
                }
            }
            tx.commit()
        })
    }

    fn set(&self, key: &str, value: &TagValue) -> Result<TagValue, RuntimeError> {
        ensure_finite(key, value)?;
        let table = self.table.clone();
        let changed = self.with_conn(|conn| {
            conn.execute(
                &format!("UPDATE {table} SET value = ?1 WHERE name = ?2"),
                params![SqlTagValue(value), key],
            )
        })?;
        if changed == 0 {
            return Err(RuntimeError::UninitializedKey(SmolStr::new(key)));
        }
        Ok(value.clone())
    }

    fn get(&self, key: &str) -> Result<TagValue, RuntimeError> {
        let table = self.table.clone();
        let row = self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT value FROM {table} WHERE name = ?1"),
                params![key],
                |row| Ok(from_sql(row.get_ref(0)?)),
            )
            .optional()
        })?;
        match row {
            Some(value) => value,
            None => Err(RuntimeError::UninitializedKey(SmolStr::new(key))),
        }
    }
}

struct SqlTagValue<'a>(&'a TagValue);

impl ToSql for SqlTagValue<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self.0 {
            TagValue::Number(value) => ToSqlOutput::Owned(SqlValue::Real(*value)),
            TagValue::Text(text) => ToSqlOutput::Borrowed(ValueRef::Text(text.as_bytes())),
        })
    }
}

#[allow(clippy::cast_precision_loss)]
fn from_sql(value: ValueRef<'_>) -> Result<TagValue, RuntimeError> {
    match value {
        ValueRef::Real(value) => Ok(TagValue::Number(value)),
        ValueRef::Integer(value) => Ok(TagValue::Number(value as f64)),
        ValueRef::Text(bytes) => std::str::from_utf8(bytes)
            .map(TagValue::from)
            .map_err(|_| RuntimeError::store("invalid utf-8 in sqlite value")),
        ValueRef::Null => Err(RuntimeError::store("null sqlite value")),
        ValueRef::Blob(_) => Err(RuntimeError::store("unexpected blob sqlite value")),
    }
}

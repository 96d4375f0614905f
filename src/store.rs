//! Destination store abstraction.
//!
//! The loader only needs parameterized writes, multi-row batches, explicit
//! commit/rollback and a max-id probe. [`SqliteStore`] is the production
//! backend; tests substitute recording doubles.

use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, OptionalExtension, ToSql};
use std::path::Path;
use tracing::debug;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Failed to open the database
    #[error("Open failed: {0}")]
    Open(String),

    /// Statement execution failed
    #[error("Query failed: {0}")]
    Query(String),

    /// Commit or rollback failed
    #[error("Transaction failed: {0}")]
    Transaction(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A single bound parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Integer(i64),
    Text(String),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

/// Parameters for one row of a statement.
pub type Row = Vec<Value>;

/// Relational store the loader writes into.
pub trait Store {
    /// Execute one statement; returns rows affected.
    fn execute(&mut self, sql: &str, params: &[Value]) -> StoreResult<usize>;

    /// Execute `sql` once per row as one unit of work; returns rows affected.
    fn execute_many(&mut self, sql: &str, rows: &[Row]) -> StoreResult<usize>;

    fn commit(&mut self) -> StoreResult<()>;

    fn rollback(&mut self) -> StoreResult<()>;

    /// Highest `id` in `table`, or `None` when the table is empty.
    fn max_id(&mut self, table: &str) -> StoreResult<Option<i64>>;

    /// `(id, name)` pairs selected by `sql`; rows with a NULL name are skipped.
    fn id_names(&mut self, sql: &str) -> StoreResult<Vec<(i64, String)>>;
}

/// SQLite backend with implicit transactions: the first write after a
/// commit/rollback opens one, `commit` closes it.
pub struct SqliteStore {
    conn: Connection,
    in_tx: bool,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .map_err(|e| StoreError::Open(format!("{}: {e}", path.display())))?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Open(e.to_string()))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        // Bulk loading: durability of individual batches matters less than throughput.
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))
            .and_then(|_| conn.pragma_update(None, "synchronous", "OFF"))
            .map_err(|e| StoreError::Open(format!("Failed to apply pragmas: {e}")))?;
        Ok(Self { conn, in_tx: false })
    }

    /// Read-only access for verification queries.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn begin(&mut self) -> StoreResult<()> {
        if !self.in_tx {
            self.conn
                .execute_batch("BEGIN")
                .map_err(|e| StoreError::Transaction(format!("BEGIN failed: {e}")))?;
            self.in_tx = true;
        }
        Ok(())
    }
}

impl Store for SqliteStore {
    fn execute(&mut self, sql: &str, params: &[Value]) -> StoreResult<usize> {
        self.begin()?;
        self.conn
            .execute(sql, params_from_iter(params.iter()))
            .map_err(|e| StoreError::Query(format!("{e} in `{sql}`")))
    }

    fn execute_many(&mut self, sql: &str, rows: &[Row]) -> StoreResult<usize> {
        self.begin()?;
        let mut stmt = self
            .conn
            .prepare_cached(sql)
            .map_err(|e| StoreError::Query(format!("{e} in `{sql}`")))?;
        let mut affected = 0;
        for row in rows {
            affected += stmt
                .execute(params_from_iter(row.iter()))
                .map_err(|e| StoreError::Query(format!("{e} in `{sql}`")))?;
        }
        debug!(rows = rows.len(), affected, "Executed batch");
        Ok(affected)
    }

    // A failed COMMIT leaves the transaction open; only a rollback ends it.
    fn commit(&mut self) -> StoreResult<()> {
        if self.in_tx {
            self.conn
                .execute_batch("COMMIT")
                .map_err(|e| StoreError::Transaction(format!("COMMIT failed: {e}")))?;
            self.in_tx = false;
        }
        Ok(())
    }

    fn rollback(&mut self) -> StoreResult<()> {
        self.in_tx = false;
        // SQLite may already have rolled back on its own after some errors.
        if !self.conn.is_autocommit() {
            self.conn
                .execute_batch("ROLLBACK")
                .map_err(|e| StoreError::Transaction(format!("ROLLBACK failed: {e}")))?;
        }
        Ok(())
    }

    fn max_id(&mut self, table: &str) -> StoreResult<Option<i64>> {
        let sql = format!("SELECT MAX(id) FROM {table}");
        self.conn
            .query_row(&sql, [], |row| row.get::<_, Option<i64>>(0))
            .optional()
            .map(Option::flatten)
            .map_err(|e| StoreError::Query(format!("{e} in `{sql}`")))
    }

    fn id_names(&mut self, sql: &str) -> StoreResult<Vec<(i64, String)>> {
        let query_err = |e: rusqlite::Error| StoreError::Query(format!("{e} in `{sql}`"));
        let mut stmt = self.conn.prepare(sql).map_err(query_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?))
            })
            .map_err(query_err)?;

        let mut pairs = Vec::new();
        for row in rows {
            if let (id, Some(name)) = row.map_err(query_err)? {
                pairs.push((id, name));
            }
        }
        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_table() -> SqliteStore {
        let mut store = SqliteStore::in_memory().unwrap();
        store
            .execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", &[])
            .unwrap();
        store.commit().unwrap();
        store
    }

    fn count(store: &SqliteStore) -> i64 {
        store
            .connection()
            .query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn max_id_empty_table_is_none() {
        let mut store = store_with_table();
        assert_eq!(store.max_id("t").unwrap(), None);
    }

    #[test]
    fn execute_many_then_commit() {
        let mut store = store_with_table();
        let rows = vec![
            vec![Value::Integer(3), Value::from("a")],
            vec![Value::Integer(9), Value::Null],
        ];
        assert_eq!(
            store
                .execute_many("INSERT INTO t (id, name) VALUES (?1, ?2)", &rows)
                .unwrap(),
            2
        );
        store.commit().unwrap();
        assert_eq!(store.max_id("t").unwrap(), Some(9));
        assert_eq!(count(&store), 2);
    }

    #[test]
    fn rollback_discards_uncommitted_rows() {
        let mut store = store_with_table();
        store
            .execute("INSERT INTO t (id, name) VALUES (?1, ?2)", &[1.into(), "x".into()])
            .unwrap();
        store.rollback().unwrap();
        assert_eq!(count(&store), 0);
    }

    #[test]
    fn failing_statement_reports_query_error() {
        let mut store = store_with_table();
        let err = store
            .execute_many("INSERT INTO missing (id) VALUES (?1)", &[vec![1.into()]])
            .unwrap_err();
        assert!(matches!(err, StoreError::Query(_)));
        store.rollback().unwrap();
    }

    #[test]
    fn failed_commit_can_be_rolled_back_and_the_next_batch_lands() {
        let mut store = SqliteStore::in_memory().unwrap();
        store
            .connection()
            .execute_batch(
                "PRAGMA foreign_keys = ON;
                 CREATE TABLE parent (id INTEGER PRIMARY KEY);
                 CREATE TABLE child (
                     id INTEGER PRIMARY KEY,
                     parent_id INTEGER REFERENCES parent(id) DEFERRABLE INITIALLY DEFERRED
                 );",
            )
            .unwrap();

        store
            .execute_many(
                "INSERT INTO child (id, parent_id) VALUES (?1, ?2)",
                &[vec![1.into(), 42.into()]],
            )
            .unwrap();
        assert!(matches!(store.commit(), Err(StoreError::Transaction(_))));
        store.rollback().unwrap();
        assert!(store.connection().is_autocommit());

        store
            .execute_many("INSERT INTO parent (id) VALUES (?1)", &[vec![7.into()]])
            .unwrap();
        store.commit().unwrap();
        assert_eq!(store.max_id("parent").unwrap(), Some(7));
        assert_eq!(store.max_id("child").unwrap(), None);
    }

    #[test]
    fn rollback_without_open_transaction_is_a_noop() {
        let mut store = store_with_table();
        store.rollback().unwrap();
        store.rollback().unwrap();
        assert_eq!(count(&store), 0);
    }

    #[test]
    fn id_names_skips_null_names() {
        let mut store = store_with_table();
        let rows = vec![
            vec![Value::Integer(1), Value::from("fiction")],
            vec![Value::Integer(2), Value::Null],
        ];
        store
            .execute_many("INSERT INTO t (id, name) VALUES (?1, ?2)", &rows)
            .unwrap();
        store.commit().unwrap();
        assert_eq!(
            store.id_names("SELECT id, name FROM t ORDER BY id").unwrap(),
            vec![(1, "fiction".to_string())]
        );
    }

    #[test]
    fn option_converts_to_null() {
        assert_eq!(Value::from(None::<String>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".to_string()));
    }
}

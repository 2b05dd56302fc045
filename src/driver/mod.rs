use crate::error::{FieldStoreError, Result};
use crate::types::{Dialect, Value};
use rusqlite::Connection;
use std::path::Path;

/// The narrow interface the schema store and record access layer consume.
/// One driver owns one backend connection; drivers are never shared across
/// threads implicitly. All SQL reaching a driver is already parameterized.
pub trait Driver {
    fn dialect(&self) -> Dialect;

    /// Execute a statement, returning the affected row count.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<usize>;

    /// Run a query, returning raw untyped rows (column values surfaced as
    /// Null/Int/Float/String/Blob). Typed decoding happens above the driver.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Vec<Value>>>;

    fn begin(&self) -> Result<()>;
    fn commit(&self) -> Result<()>;
    fn rollback(&self) -> Result<()>;
}

/// Run `f` inside an exclusive transaction: committed on success, rolled
/// back on any error path before the error propagates.
pub(crate) fn with_transaction<D, T, F>(driver: &D, f: F) -> Result<T>
where
    D: Driver + ?Sized,
    F: FnOnce() -> Result<T>,
{
    driver.begin()?;
    match f() {
        Ok(value) => {
            driver.commit()?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = driver.rollback() {
                log::warn!("rollback after failed transaction also failed: {rollback_err}");
            }
            Err(e)
        }
    }
}

/// Embedded SQLite driver over rusqlite.
pub struct SqliteDriver {
    conn: Connection,
}

impl SqliteDriver {
    /// Open or create a SQLite database file.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::configure(&conn)?;
        Ok(SqliteDriver { conn })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;
        Ok(SqliteDriver { conn })
    }

    // LIKE must be case-sensitive to match PostgreSQL comparison semantics.
    fn configure(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA case_sensitive_like = ON;
             PRAGMA foreign_keys = ON;",
        )?;
        Ok(())
    }

    fn bind(params: &[Value]) -> Result<Vec<rusqlite::types::Value>> {
        params.iter().map(to_sqlite).collect()
    }
}

impl Driver for SqliteDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<usize> {
        let bound = Self::bind(params)?;
        let count = self
            .conn
            .execute(sql, rusqlite::params_from_iter(bound))
            .map_err(classify)?;
        Ok(count)
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Vec<Value>>> {
        let bound = Self::bind(params)?;
        let mut stmt = self.conn.prepare(sql)?;
        let column_count = stmt.column_count();
        let mut rows = stmt.query(rusqlite::params_from_iter(bound)).map_err(classify)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(classify)? {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                let raw: rusqlite::types::Value = row.get(i)?;
                values.push(from_sqlite(raw));
            }
            out.push(values);
        }
        Ok(out)
    }

    fn begin(&self) -> Result<()> {
        self.conn.execute_batch("BEGIN TRANSACTION")?;
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

/// Classify backend errors: unique/primary-key constraint failures get
/// their own error kind so callers can handle them uniformly across
/// backends. The store attaches the collection name on the way out.
fn classify(e: rusqlite::Error) -> FieldStoreError {
    if let rusqlite::Error::SqliteFailure(ffi, _) = &e {
        // Only unique/primary-key failures; other constraint violations
        // (NOT NULL, CHECK) stay backend errors.
        if ffi.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
            || ffi.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        {
            return FieldStoreError::UniquenessViolation {
                collection: String::new(),
                message: e.to_string(),
            };
        }
    }
    FieldStoreError::Backend(e.to_string())
}

fn to_sqlite(value: &Value) -> Result<rusqlite::types::Value> {
    use rusqlite::types::Value as Sql;
    let v = match value {
        Value::Null => Sql::Null,
        Value::Int(n) => Sql::Integer(*n),
        Value::Float(f) => Sql::Real(*f),
        Value::String(s) => Sql::Text(s.clone()),
        Value::Boolean(b) => Sql::Integer(i64::from(*b)),
        Value::Blob(b) => Sql::Blob(b.clone()),
        // Datetimes and lists are encoded to text before reaching the
        // driver; a leak here is a translator bug.
        other => {
            return Err(FieldStoreError::Backend(format!(
                "cannot bind {} value directly",
                other.type_name()
            )))
        }
    };
    Ok(v)
}

fn from_sqlite(raw: rusqlite::types::Value) -> Value {
    use rusqlite::types::Value as Sql;
    match raw {
        Sql::Null => Value::Null,
        Sql::Integer(n) => Value::Int(n),
        Sql::Real(f) => Value::Float(f),
        Sql::Text(s) => Value::String(s),
        Sql::Blob(b) => Value::Blob(b),
    }
}

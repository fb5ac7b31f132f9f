use rusqlite::{Connection, OptionalExtension, Params, Row, Transaction, TransactionBehavior};
use std::path::Path;
use tracing::{debug, info, trace, warn};

use crate::config::{AppendMode, StoreConfig};
use crate::error::{Result, StoreError};
use crate::events::EventTable;
use crate::quotes::QuoteTable;

/// Handle on the journal's SQLite file.
///
/// Holds only the location; every [`Database::scoped`] call opens its own
/// connection and releases it when the scope ends.
#[derive(Debug, Clone)]
pub struct Database {
    config: StoreConfig,
}

impl Database {
    pub fn new(config: StoreConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        info!("Database initialized at: {}", config.path.display());
        Ok(Self { config })
    }

    /// Open with default settings at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(StoreConfig::new(path))
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.config.path)?;
        conn.busy_timeout(self.config.busy_timeout())?;
        Ok(conn)
    }

    /// Run `f` inside one transaction.
    ///
    /// The transaction commits when `f` returns `Ok` and rolls back when it
    /// returns `Err` or panics. The write lock is taken when the scope opens.
    /// Fails with [`StoreError::AppendModeMismatch`] when the file was laid
    /// out for another [`AppendMode`].
    pub fn scoped<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&ConnectionScope<'_>) -> Result<T>,
    {
        self.run_scope(true, f)
    }

    /// Like [`Database::scoped`] without the append mode check, for
    /// conversions between layouts.
    pub(crate) fn scoped_any_mode<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&ConnectionScope<'_>) -> Result<T>,
    {
        self.run_scope(false, f)
    }

    fn run_scope<T, F>(&self, check_mode: bool, f: F) -> Result<T>
    where
        F: FnOnce(&ConnectionScope<'_>) -> Result<T>,
    {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let scope = ConnectionScope {
            tx,
            append_mode: self.config.append_mode,
        };

        let result = if check_mode {
            scope.check_append_mode().and_then(|()| f(&scope))
        } else {
            f(&scope)
        };

        match result {
            Ok(value) => {
                scope.tx.commit()?;
                trace!("scope committed");
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = scope.tx.rollback() {
                    warn!("Rollback failed after {}: {}", err, rollback_err);
                }
                debug!("scope rolled back: {}", err);
                Err(err)
            }
        }
    }
}

/// One open transaction on the journal database.
pub struct ConnectionScope<'conn> {
    tx: Transaction<'conn>,
    append_mode: AppendMode,
}

impl<'conn> ConnectionScope<'conn> {
    /// Execute one statement with positional parameters, returning the number
    /// of changed rows.
    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
        let mut stmt = self.tx.prepare_cached(sql)?;
        let changed = stmt.execute(params)?;
        trace!(changed, "executed: {}", sql);
        Ok(changed)
    }

    /// First row of a query, or `None` when it returns nothing.
    pub fn query_optional<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<Option<T>>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        let mut stmt = self.tx.prepare_cached(sql)?;
        let row = stmt.query_row(params, f).optional()?;
        Ok(row)
    }

    pub fn query_all<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<Vec<T>>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let mut stmt = self.tx.prepare_cached(sql)?;
        let rows = stmt
            .query_map(params, f)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn last_insert_rowid(&self) -> i64 {
        self.tx.last_insert_rowid()
    }

    pub fn append_mode(&self) -> AppendMode {
        self.append_mode
    }

    /// Append mode the file was laid out for, if one was recorded.
    pub fn stored_append_mode(&self) -> Result<Option<AppendMode>> {
        let tag: i64 = self.tx.pragma_query_value(None, "user_version", |row| row.get(0))?;
        Ok(AppendMode::from_schema_tag(tag))
    }

    pub(crate) fn record_append_mode(&self, mode: AppendMode) -> Result<()> {
        self.tx.pragma_update(None, "user_version", mode.schema_tag())?;
        debug!("Recorded {:?} append mode", mode);
        Ok(())
    }

    fn check_append_mode(&self) -> Result<()> {
        match self.stored_append_mode()? {
            Some(stored) if stored != self.append_mode => Err(StoreError::AppendModeMismatch {
                stored,
                configured: self.append_mode,
            }),
            _ => Ok(()),
        }
    }

    /// Event operations bound to this transaction.
    pub fn events(&self) -> EventTable<'_> {
        EventTable::new(self)
    }

    /// Quote ledger operations bound to this transaction.
    pub fn quotes(&self) -> QuoteTable<'_> {
        QuoteTable::new(self)
    }
}

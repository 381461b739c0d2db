//! Transactional execution shell.
//!
//! A [`TransactionShell`] holds one connection for the whole transaction
//! and drives an explicit begin/commit/rollback state machine on top of
//! it. Unlike [`Shell`](crate::shell::Shell), the connection is acquired
//! eagerly at construction and is never returned mid-transaction: a failed
//! statement only updates the reuse classification, and the caller decides
//! whether to keep going or bail out. Dropping a started shell rolls the
//! transaction back.
//!
//! Statements inside a transaction never ping the connection: a
//! transparent reconnect would start a fresh session and silently discard
//! the open transaction.

use crate::conn::{Connector, QueryParam, RawConnection, Row};
use crate::error::{DbError, DbResult};
use crate::pool::{Pool, PooledConnection};
use crate::shell::{run_execute, run_execute_many, run_fetch, single_row};
use tracing::{debug, warn};

/// Transaction lifecycle. `Ended` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    NotStarted,
    Started,
    Ended,
}

/// Execution shell with an explicit transaction lifecycle.
///
/// Created by [`Pool::transaction`]. The expected shape is:
///
/// ```ignore
/// let mut tx = pool.transaction()?;
/// tx.begin()?;
/// tx.execute("INSERT INTO t (id) VALUES (?)", &[QueryParam::Int(1)])?;
/// tx.commit()?;
/// ```
///
/// If any `?` exits the scope before `commit()`, dropping the shell rolls
/// the transaction back and releases the connection.
pub struct TransactionShell<N: Connector> {
    pool: Pool<N>,
    connection: Option<PooledConnection<N::Conn>>,
    /// Auto-commit flag captured before the transaction, restored after.
    original_autocommit: bool,
    /// Set once `set_autocommit(false)` succeeds, cleared after restore.
    autocommit_changed: bool,
    state: TxState,
    /// Sticky: flips to false on the first non-reusable error and stays.
    reusable: bool,
}

impl<N: Connector> TransactionShell<N> {
    pub(crate) fn new(pool: Pool<N>) -> DbResult<Self> {
        let conn = pool.get()?;
        let original_autocommit = conn.raw().autocommit();
        Ok(Self {
            pool,
            connection: Some(conn),
            original_autocommit,
            autocommit_changed: false,
            state: TxState::NotStarted,
            reusable: true,
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TxState {
        self.state
    }

    /// Start the transaction. Disables auto-commit and issues an explicit
    /// begin. Valid only once.
    pub fn begin(&mut self) -> DbResult<()> {
        match self.state {
            TxState::NotStarted => {}
            TxState::Started | TxState::Ended => return Err(DbError::TransactionAlreadyStarted),
        }

        let conn = self.connection_mut()?;
        if let Err(err) = conn.raw_mut().set_autocommit(false) {
            self.note_error(&err);
            return Err(err);
        }
        self.autocommit_changed = true;

        let conn = self.connection_mut()?;
        if let Err(err) = conn.raw_mut().begin() {
            self.note_error(&err);
            return Err(err);
        }

        self.state = TxState::Started;
        debug!("transaction started");
        Ok(())
    }

    /// Run a query inside the transaction and return every row.
    pub fn query(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<Row>> {
        self.check_started()?;
        let conn = self.connection_mut()?;
        let result = run_fetch(conn, sql, params);
        self.observe(result)
    }

    /// Run a query expected to produce at most one row.
    pub fn get(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<Option<Row>> {
        single_row(self.query(sql, params)?)
    }

    /// Run a statement and return the affected row count.
    pub fn execute_row_count(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        self.check_started()?;
        let conn = self.connection_mut()?;
        let result = run_execute(conn, sql, params);
        self.observe(result).map(|(rows, _)| rows)
    }

    /// Run an insert and return the auto-generated row id, if any.
    pub fn execute_last_id(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<Option<u64>> {
        self.check_started()?;
        let conn = self.connection_mut()?;
        let result = run_execute(conn, sql, params);
        self.observe(result).map(|(_, id)| id)
    }

    /// Run a statement per parameter set; returns the total row count.
    pub fn execute_many_row_count(
        &mut self,
        sql: &str,
        param_sets: &[Vec<QueryParam>],
    ) -> DbResult<u64> {
        self.check_started()?;
        let conn = self.connection_mut()?;
        let result = run_execute_many(conn, sql, param_sets);
        self.observe(result).map(|(rows, _)| rows)
    }

    /// Run an insert per parameter set; returns the last generated id.
    pub fn execute_many_last_id(
        &mut self,
        sql: &str,
        param_sets: &[Vec<QueryParam>],
    ) -> DbResult<Option<u64>> {
        self.check_started()?;
        let conn = self.connection_mut()?;
        let result = run_execute_many(conn, sql, param_sets);
        self.observe(result).map(|(_, id)| id)
    }

    /// Alias for [`TransactionShell::execute_row_count`].
    pub fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        self.execute_row_count(sql, params)
    }

    /// Alias for [`TransactionShell::execute_row_count`].
    pub fn update(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        self.execute_row_count(sql, params)
    }

    /// Alias for [`TransactionShell::execute_last_id`].
    pub fn insert(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<Option<u64>> {
        self.execute_last_id(sql, params)
    }

    /// Alias for [`TransactionShell::execute_many_row_count`].
    pub fn update_many(&mut self, sql: &str, param_sets: &[Vec<QueryParam>]) -> DbResult<u64> {
        self.execute_many_row_count(sql, param_sets)
    }

    /// Alias for [`TransactionShell::execute_many_last_id`].
    pub fn insert_many(
        &mut self,
        sql: &str,
        param_sets: &[Vec<QueryParam>],
    ) -> DbResult<Option<u64>> {
        self.execute_many_last_id(sql, param_sets)
    }

    /// Commit the transaction and release the connection.
    ///
    /// If the commit itself fails, a rollback is attempted so the server
    /// is not left holding locks; a failure of that secondary rollback is
    /// logged rather than propagated, and the commit error is returned.
    pub fn commit(&mut self) -> DbResult<()> {
        self.check_started()?;

        let commit_result = {
            let conn = self.connection_mut()?;
            conn.raw_mut().commit()
        };

        match commit_result {
            Ok(()) => {
                debug!("transaction committed");
                self.end();
                Ok(())
            }
            Err(err) => {
                self.note_error(&err);
                if let Ok(conn) = self.connection_mut() {
                    if let Err(rb_err) = conn.raw_mut().rollback() {
                        warn!(error = %rb_err, "rollback after failed commit also failed");
                        self.reusable = false;
                    }
                }
                self.end();
                Err(err)
            }
        }
    }

    /// Roll back the transaction and release the connection.
    ///
    /// A rollback failure leaves the connection in an unknown state, so it
    /// is discarded; the error still propagates.
    pub fn rollback(&mut self) -> DbResult<()> {
        self.check_started()?;

        let rollback_result = {
            let conn = self.connection_mut()?;
            conn.raw_mut().rollback()
        };

        match rollback_result {
            Ok(()) => {
                debug!("transaction rolled back");
                self.end();
                Ok(())
            }
            Err(err) => {
                self.reusable = false;
                self.end();
                Err(err)
            }
        }
    }

    fn check_started(&self) -> DbResult<()> {
        match self.state {
            TxState::Started => Ok(()),
            TxState::NotStarted => Err(DbError::TransactionNotStarted),
            TxState::Ended => Err(DbError::TransactionEnded),
        }
    }

    fn connection_mut(&mut self) -> DbResult<&mut PooledConnection<N::Conn>> {
        self.connection
            .as_mut()
            .ok_or(DbError::TransactionEnded)
    }

    /// Record a statement outcome without releasing the connection; the
    /// transaction stays open and the caller decides what to do next.
    fn observe<T>(&mut self, result: DbResult<T>) -> DbResult<T> {
        match result {
            Ok(value) => {
                if let Some(conn) = self.connection.as_mut() {
                    conn.touch();
                }
                Ok(value)
            }
            Err(err) => {
                self.note_error(&err);
                Err(err)
            }
        }
    }

    fn note_error(&mut self, err: &DbError) {
        if !err.is_reusable() {
            self.reusable = false;
        }
    }

    /// Restore auto-commit, mark the state machine terminal, and release
    /// the connection exactly once.
    fn end(&mut self) {
        self.restore_autocommit();
        self.state = TxState::Ended;
        self.release();
    }

    /// Put the auto-commit flag back the way it was. A failure here is
    /// logged and folded into the reuse classification, not propagated:
    /// the transaction outcome is already decided.
    fn restore_autocommit(&mut self) {
        if !self.autocommit_changed {
            return;
        }
        let original = self.original_autocommit;
        if let Some(conn) = self.connection.as_mut() {
            if let Err(err) = conn.raw_mut().set_autocommit(original) {
                warn!(error = %err, "failed to restore auto-commit");
                if !err.is_reusable() {
                    self.reusable = false;
                }
            } else {
                self.autocommit_changed = false;
            }
        }
    }

    /// Return the connection per the accumulated classification. Idempotent.
    fn release(&mut self) {
        if let Some(conn) = self.connection.take() {
            debug!(conn = %conn.id(), can_reuse = self.reusable, "transaction shell releasing connection");
            self.pool.release(conn, self.reusable);
        }
    }
}

impl<N: Connector> Drop for TransactionShell<N> {
    fn drop(&mut self) {
        if self.connection.is_none() {
            return;
        }
        if self.state == TxState::Started {
            // scope exited without commit: roll back, best effort
            warn!("transaction shell dropped while started, rolling back");
            if let Ok(conn) = self.connection_mut() {
                if let Err(err) = conn.raw_mut().rollback() {
                    warn!(error = %err, "rollback on drop failed");
                    self.reusable = false;
                }
            }
        }
        self.restore_autocommit();
        self.state = TxState::Ended;
        self.release();
    }
}

impl<N: Connector> std::fmt::Debug for TransactionShell<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionShell")
            .field("state", &self.state)
            .field("reusable", &self.reusable)
            .finish_non_exhaustive()
    }
}

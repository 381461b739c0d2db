//! Non-transactional execution shell.
//!
//! A [`Shell`] is a short-lived borrower of one pooled connection: it
//! checks a connection out on its first statement, keeps it for every
//! statement in the same scope, and gives it back when dropped. Statements
//! run in auto-commit mode. When a statement fails, the error is
//! classified and the connection is returned (or discarded) immediately;
//! the next statement borrows a fresh one.

use crate::conn::{Connector, QueryParam, RawConnection, Row};
use crate::error::{DbError, DbResult};
use crate::pool::{Pool, PooledConnection};
use tracing::debug;

/// Run a fetching statement on a checked-out connection.
pub(crate) fn run_fetch<C: RawConnection>(
    conn: &mut PooledConnection<C>,
    sql: &str,
    params: &[QueryParam],
) -> DbResult<Vec<Row>> {
    let mut cursor = conn.raw_mut().cursor()?;
    cursor.execute(sql, params)?;
    cursor.fetch_all()
}

/// Run a modifying statement; returns (rows affected, last insert id).
pub(crate) fn run_execute<C: RawConnection>(
    conn: &mut PooledConnection<C>,
    sql: &str,
    params: &[QueryParam],
) -> DbResult<(u64, Option<u64>)> {
    let mut cursor = conn.raw_mut().cursor()?;
    let rows = cursor.execute(sql, params)?;
    let last_id = cursor.last_insert_id();
    Ok((rows, last_id))
}

/// Run a modifying statement once per parameter set.
pub(crate) fn run_execute_many<C: RawConnection>(
    conn: &mut PooledConnection<C>,
    sql: &str,
    param_sets: &[Vec<QueryParam>],
) -> DbResult<(u64, Option<u64>)> {
    let mut cursor = conn.raw_mut().cursor()?;
    let rows = cursor.execute_many(sql, param_sets)?;
    let last_id = cursor.last_insert_id();
    Ok((rows, last_id))
}

/// Reduce a row set to the single expected row.
///
/// Zero rows is `Ok(None)`; more than one row is a [`DbError::MultipleRows`]
/// application error (the server answered normally, so the connection
/// stays reusable).
pub(crate) fn single_row(mut rows: Vec<Row>) -> DbResult<Option<Row>> {
    match rows.len() {
        0 => Ok(None),
        1 => Ok(rows.pop()),
        count => Err(DbError::MultipleRows { count }),
    }
}

/// Scope-bound, auto-committing borrower of one pooled connection.
///
/// Created by [`Pool::shell`]. Dropping the shell returns any held
/// connection to the pool.
pub struct Shell<N: Connector> {
    pool: Pool<N>,
    connection: Option<PooledConnection<N::Conn>>,
}

impl<N: Connector> Shell<N> {
    pub(crate) fn new(pool: Pool<N>) -> Self {
        Self {
            pool,
            connection: None,
        }
    }

    /// Run a query and return every row.
    pub fn query(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<Row>> {
        let conn = self.checkout()?;
        let result = run_fetch(conn, sql, params);
        self.settle(result)
    }

    /// Run a query expected to produce at most one row.
    pub fn get(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<Option<Row>> {
        single_row(self.query(sql, params)?)
    }

    /// Run a statement and return the affected row count.
    pub fn execute_row_count(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        let conn = self.checkout()?;
        let result = run_execute(conn, sql, params);
        self.settle(result).map(|(rows, _)| rows)
    }

    /// Run an insert and return the auto-generated row id, if any.
    pub fn execute_last_id(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<Option<u64>> {
        let conn = self.checkout()?;
        let result = run_execute(conn, sql, params);
        self.settle(result).map(|(_, id)| id)
    }

    /// Run a statement per parameter set; returns the total row count.
    pub fn execute_many_row_count(
        &mut self,
        sql: &str,
        param_sets: &[Vec<QueryParam>],
    ) -> DbResult<u64> {
        let conn = self.checkout()?;
        let result = run_execute_many(conn, sql, param_sets);
        self.settle(result).map(|(rows, _)| rows)
    }

    /// Run an insert per parameter set; returns the last generated id.
    pub fn execute_many_last_id(
        &mut self,
        sql: &str,
        param_sets: &[Vec<QueryParam>],
    ) -> DbResult<Option<u64>> {
        let conn = self.checkout()?;
        let result = run_execute_many(conn, sql, param_sets);
        self.settle(result).map(|(_, id)| id)
    }

    /// Alias for [`Shell::execute_row_count`].
    pub fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        self.execute_row_count(sql, params)
    }

    /// Alias for [`Shell::execute_row_count`].
    pub fn update(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        self.execute_row_count(sql, params)
    }

    /// Alias for [`Shell::execute_last_id`].
    pub fn insert(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<Option<u64>> {
        self.execute_last_id(sql, params)
    }

    /// Alias for [`Shell::execute_many_row_count`].
    pub fn update_many(&mut self, sql: &str, param_sets: &[Vec<QueryParam>]) -> DbResult<u64> {
        self.execute_many_row_count(sql, param_sets)
    }

    /// Alias for [`Shell::execute_many_last_id`].
    pub fn insert_many(
        &mut self,
        sql: &str,
        param_sets: &[Vec<QueryParam>],
    ) -> DbResult<Option<u64>> {
        self.execute_many_last_id(sql, param_sets)
    }

    /// Whether this shell currently holds a connection.
    pub fn holds_connection(&self) -> bool {
        self.connection.is_some()
    }

    /// Borrow the held connection, checking one out if needed.
    ///
    /// A held connection idle past its window is pinged (with transparent
    /// reconnect) before use; statements run in auto-commit mode here, so
    /// a reconnect loses nothing. A failed ping is classified like any
    /// statement error.
    fn checkout(&mut self) -> DbResult<&mut PooledConnection<N::Conn>> {
        if self.connection.is_none() {
            self.connection = Some(self.pool.get()?);
        }
        if let Some(conn) = self.connection.as_mut() {
            if let Err(err) = conn.keepalive() {
                self.release(err.is_reusable());
                return Err(err);
            }
        }
        match self.connection.as_mut() {
            Some(conn) => Ok(conn),
            None => Err(DbError::internal("shell lost its connection")),
        }
    }

    /// Classify the statement outcome. A failed statement returns the
    /// connection immediately (discarding it when not reusable); the
    /// error then propagates unchanged.
    fn settle<T>(&mut self, result: DbResult<T>) -> DbResult<T> {
        match result {
            Ok(value) => {
                if let Some(conn) = self.connection.as_mut() {
                    conn.touch();
                }
                Ok(value)
            }
            Err(err) => {
                self.release(err.is_reusable());
                Err(err)
            }
        }
    }

    /// Return the held connection, if any. Idempotent.
    fn release(&mut self, can_reuse: bool) {
        if let Some(conn) = self.connection.take() {
            debug!(conn = %conn.id(), can_reuse = can_reuse, "shell releasing connection");
            self.pool.release(conn, can_reuse);
        }
    }
}

impl<N: Connector> Drop for Shell<N> {
    fn drop(&mut self) {
        // clean scope exit: the connection goes back as reusable
        self.release(true);
    }
}

impl<N: Connector> std::fmt::Debug for Shell<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shell")
            .field("holds_connection", &self.holds_connection())
            .finish_non_exhaustive()
    }
}

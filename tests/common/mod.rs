//! Shared test driver: a scriptable in-memory database.
//!
//! `MockDb` plays the server: a single table of JSON rows with
//! transactional pending-write semantics, per-statement scripted
//! failures, and counters for every lifecycle event the pool and shells
//! can trigger. `MockConnector`/`MockConn` adapt it to the dbshell
//! collaborator traits.

#![allow(dead_code)]

use dbshell::config::ConnectParams;
use dbshell::conn::{Connector, QueryCursor, QueryParam, RawConnection, Row};
use dbshell::error::{DbError, DbResult};
use dbshell::pool::Pool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
pub struct MockState {
    /// Committed rows of the one mock table.
    pub rows: Vec<Row>,
    /// One-shot scripted failure per exact SQL string.
    fail_next: HashMap<String, DbError>,
    fail_connect: bool,
    fail_commit: Option<DbError>,
    fail_rollback: Option<DbError>,
    next_id: u64,
    pub opened: usize,
    pub closed: usize,
    pub pings: usize,
    pub begins: usize,
    pub commits: usize,
    pub rollbacks: usize,
    /// Every value passed to set_autocommit, in order.
    pub autocommit_calls: Vec<bool>,
}

/// The scriptable in-memory server, shared by every mock connection.
#[derive(Default)]
pub struct MockDb {
    state: Mutex<MockState>,
}

impl MockDb {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Script the next execution of `sql` to fail with `err`.
    pub fn fail_next(&self, sql: &str, err: DbError) {
        self.state().fail_next.insert(sql.to_string(), err);
    }

    /// Make every subsequent connect attempt fail.
    pub fn fail_connect(&self, fail: bool) {
        self.state().fail_connect = fail;
    }

    /// Script the next commit to fail with `err`.
    pub fn fail_commit(&self, err: DbError) {
        self.state().fail_commit = Some(err);
    }

    /// Script the next rollback to fail with `err`.
    pub fn fail_rollback(&self, err: DbError) {
        self.state().fail_rollback = Some(err);
    }

    pub fn row_count(&self) -> usize {
        self.state().rows.len()
    }

    pub fn opened(&self) -> usize {
        self.state().opened
    }

    pub fn closed(&self) -> usize {
        self.state().closed
    }

    pub fn pings(&self) -> usize {
        self.state().pings
    }

    pub fn rollbacks(&self) -> usize {
        self.state().rollbacks
    }

    pub fn commits(&self) -> usize {
        self.state().commits
    }

    /// The most recent set_autocommit value seen by any connection.
    pub fn last_autocommit(&self) -> Option<bool> {
        self.state().autocommit_calls.last().copied()
    }
}

pub struct MockConnector {
    pub db: Arc<MockDb>,
}

impl Connector for MockConnector {
    type Conn = MockConn;

    fn connect(&self, _params: &ConnectParams) -> DbResult<MockConn> {
        let mut state = self.db.state();
        if state.fail_connect {
            return Err(DbError::connection("connection refused"));
        }
        state.opened += 1;
        drop(state);
        Ok(MockConn {
            db: Arc::clone(&self.db),
            autocommit: true,
            pending: Vec::new(),
        })
    }
}

pub struct MockConn {
    db: Arc<MockDb>,
    autocommit: bool,
    /// Uncommitted writes while auto-commit is off.
    pending: Vec<Row>,
}

impl RawConnection for MockConn {
    fn close(&mut self) {
        self.db.state().closed += 1;
    }

    fn ping(&mut self, reconnect: bool) -> DbResult<()> {
        self.db.state().pings += 1;
        if reconnect {
            // a reconnect is a fresh session: uncommitted state is gone
            self.pending.clear();
            self.autocommit = true;
        }
        Ok(())
    }

    fn cursor(&mut self) -> DbResult<Box<dyn QueryCursor + '_>> {
        Ok(Box::new(MockCursor {
            conn: self,
            fetched: Vec::new(),
            last_insert_id: None,
        }))
    }

    fn autocommit(&self) -> bool {
        self.autocommit
    }

    fn set_autocommit(&mut self, enabled: bool) -> DbResult<()> {
        self.autocommit = enabled;
        self.db.state().autocommit_calls.push(enabled);
        Ok(())
    }

    fn begin(&mut self) -> DbResult<()> {
        self.db.state().begins += 1;
        Ok(())
    }

    fn commit(&mut self) -> DbResult<()> {
        let mut state = self.db.state();
        if let Some(err) = state.fail_commit.take() {
            return Err(err);
        }
        state.commits += 1;
        state.rows.append(&mut self.pending);
        Ok(())
    }

    fn rollback(&mut self) -> DbResult<()> {
        let mut state = self.db.state();
        if let Some(err) = state.fail_rollback.take() {
            return Err(err);
        }
        state.rollbacks += 1;
        self.pending.clear();
        Ok(())
    }
}

struct MockCursor<'a> {
    conn: &'a mut MockConn,
    fetched: Vec<Row>,
    last_insert_id: Option<u64>,
}

impl MockCursor<'_> {
    fn run(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        let mut state = self.conn.db.state();
        if let Some(err) = state.fail_next.remove(sql) {
            return Err(err);
        }

        let verb = sql
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_ascii_uppercase();
        match verb.as_str() {
            "INSERT" => {
                state.next_id += 1;
                let id = state.next_id;
                let mut row = Row::new();
                row.insert("id".to_string(), id.into());
                for (i, param) in params.iter().enumerate() {
                    row.insert(format!("v{i}"), param.to_json());
                }
                if self.conn.autocommit {
                    state.rows.push(row);
                } else {
                    self.conn.pending.push(row);
                }
                self.last_insert_id = Some(id);
                Ok(1)
            }
            "SELECT" => {
                // a connection sees committed rows plus its own pending writes
                let mut rows = state.rows.clone();
                rows.extend(self.conn.pending.iter().cloned());
                let count = rows.len() as u64;
                self.fetched = rows;
                Ok(count)
            }
            "DELETE" => {
                let removed = state.rows.len() as u64;
                state.rows.clear();
                Ok(removed)
            }
            _ => Ok(0),
        }
    }
}

impl QueryCursor for MockCursor<'_> {
    fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        self.run(sql, params)
    }

    fn execute_many(&mut self, sql: &str, param_sets: &[Vec<QueryParam>]) -> DbResult<u64> {
        let mut total = 0;
        for params in param_sets {
            total += self.run(sql, params)?;
        }
        Ok(total)
    }

    fn fetch_all(&mut self) -> DbResult<Vec<Row>> {
        Ok(std::mem::take(&mut self.fetched))
    }

    fn last_insert_id(&self) -> Option<u64> {
        self.last_insert_id
    }
}

/// A pool over a fresh mock server with default options.
pub fn mock_pool() -> (Pool<MockConnector>, Arc<MockDb>) {
    let db = MockDb::new();
    let params = ConnectParams::new("mock", "test");
    let pool = Pool::new(params, MockConnector { db: Arc::clone(&db) });
    (pool, db)
}

/// Same but with an explicit idle window in seconds.
pub fn mock_pool_with_max_idle(max_idle_secs: u64) -> (Pool<MockConnector>, Arc<MockDb>) {
    let db = MockDb::new();
    let mut params = ConnectParams::new("mock", "test");
    params.pool.max_idle_secs = Some(max_idle_secs);
    let pool = Pool::new(params, MockConnector { db: Arc::clone(&db) });
    (pool, db)
}

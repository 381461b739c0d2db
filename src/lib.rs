//! dbshell — connection pool and transactional execution shells.
//!
//! This library manages a set of expensive database connections and lends
//! them to short-lived execution shells:
//!
//! - [`Pool`] creates, lends, reclaims, and discards connections. It is
//!   unbounded (grows on demand, never blocks on capacity) and
//!   fork-safe: every connection carries the pool [`pool::Generation`]
//!   that created it, and a process-identity change or an explicit
//!   [`Pool::reset`] starts a fresh generation so no socket is shared
//!   across a fork boundary.
//! - [`Shell`] runs auto-committed statements, borrowing one connection
//!   lazily for its scope.
//! - [`TransactionShell`] holds one connection for an explicit
//!   begin/commit/rollback lifecycle, rolling back on drop.
//!
//! Whether an errored connection goes back into the pool is decided by a
//! closed classification on [`DbError`]: connectivity and protocol
//! failures discard the connection, server-rejected statements and local
//! application errors keep it.
//!
//! The crate speaks no wire protocol. A driver adapter supplies the
//! [`Connector`] and [`RawConnection`] implementations; everything here is
//! synchronous and thread-safe.

pub mod config;
pub mod conn;
pub mod error;
pub mod pool;
pub mod shell;
pub mod transaction;

pub use config::{ConnectParams, PoolOptions};
pub use conn::{Connector, QueryCursor, QueryParam, RawConnection, Row};
pub use error::{DbError, DbResult, reusable_after};
pub use pool::{Pool, PooledConnection};
pub use shell::Shell;
pub use transaction::{TransactionShell, TxState};

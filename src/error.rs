//! Error types for dbshell.
//!
//! This module defines all error types using `thiserror` and the reuse
//! classification that drives the pool's keep-or-discard decision. Every
//! error carries an explicit kind (its enum variant); the classifier
//! switches on that kind rather than on open-ended subtype membership.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    /// The server dropped the connection, the handshake failed, or the
    /// network timed out. The physical connection is in an unknown state.
    #[error("Connection failed: {message}")]
    Connection { message: String },

    /// The wire protocol desynchronized mid-conversation.
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// The server rejected the statement as malformed.
    #[error("Syntax error: {message}")]
    Syntax {
        message: String,
        /// e.g. "42000" for a MySQL parse failure
        sql_state: Option<String>,
    },

    /// The server understood the statement but does not support it.
    #[error("Operation not supported: {message}")]
    Unsupported { message: String },

    /// A key, foreign-key, or check constraint rejected the statement.
    #[error("Constraint violation: {message}")]
    Constraint {
        message: String,
        sql_state: Option<String>,
    },

    /// A server-side error outside the known-safe classes above.
    #[error("Database error: {message}")]
    Database {
        message: String,
        sql_state: Option<String>,
    },

    /// A single-row query returned more than one row.
    #[error("Multiple rows returned for a single-row query ({count} rows)")]
    MultipleRows { count: usize },

    /// A statement was issued before `begin()`.
    #[error("Transaction not started")]
    TransactionNotStarted,

    /// `begin()` was called on a transaction that already started.
    #[error("Transaction already started")]
    TransactionAlreadyStarted,

    /// The transaction already committed or rolled back.
    #[error("Transaction has ended")]
    TransactionEnded,

    /// Invalid connection parameters.
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// A purely local failure with no server round trip.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a connectivity error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a syntax error with optional SQL state.
    pub fn syntax(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Syntax {
            message: message.into(),
            sql_state,
        }
    }

    /// Create an unsupported-operation error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    /// Create a constraint violation with optional SQL state.
    pub fn constraint(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Constraint {
            message: message.into(),
            sql_state,
        }
    }

    /// Create a generic server-side error.
    pub fn database(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the SQL state reported by the server, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Syntax { sql_state, .. }
            | Self::Constraint { sql_state, .. }
            | Self::Database { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// Whether the connection this error was observed on is still safe to
    /// hand to another caller.
    ///
    /// Connectivity and protocol failures leave the socket in an unknown
    /// state, as does any server-side error not in a known-safe class. A
    /// server that parsed the request and rejected it answered over a
    /// healthy connection, and errors with no server round trip at all
    /// never touched the socket.
    pub fn is_reusable(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Protocol { .. } | Self::Database { .. } => false,
            Self::Syntax { .. }
            | Self::Unsupported { .. }
            | Self::Constraint { .. }
            | Self::MultipleRows { .. }
            | Self::TransactionNotStarted
            | Self::TransactionAlreadyStarted
            | Self::TransactionEnded
            | Self::Config { .. }
            | Self::Internal { .. } => true,
        }
    }
}

/// Classify reusability from the error present at a scope exit.
///
/// `None` means the scope exited cleanly.
pub fn reusable_after(err: Option<&DbError>) -> bool {
    err.is_none_or(DbError::is_reusable)
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

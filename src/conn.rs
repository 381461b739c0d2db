//! Raw-connection collaborator contract.
//!
//! The pool does not speak any wire protocol itself. A driver adapter
//! implements [`Connector`] (how to open a session from resolved
//! parameters) and [`RawConnection`] (the small capability surface the
//! shells need: cursors, ping, auto-commit control, and explicit
//! transaction commands). Rows come back as field-name-to-value maps.

use crate::config::ConnectParams;
use crate::error::DbResult;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// One result row, keyed by column name.
pub type Row = serde_json::Map<String, JsonValue>;

/// A parameter value for parameterized queries.
///
/// Serialized as plain JSON values. `Bytes` is written as a base64
/// string, and because deserialization is untagged any string matches the
/// `String` variant first: binary parameters do not round-trip through
/// JSON as `Bytes`. Callers that need the distinction must decode the
/// base64 themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
        }
    }

    /// Convert to a JSON value, for drivers that store rows as JSON.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Bool(v) => JsonValue::Bool(*v),
            Self::Int(v) => JsonValue::Number((*v).into()),
            Self::Float(v) => serde_json::Number::from_f64(*v)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Self::String(v) => JsonValue::String(v.clone()),
            Self::Bytes(v) => {
                use base64::{Engine as _, engine::general_purpose::STANDARD};
                JsonValue::String(STANDARD.encode(v))
            }
        }
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Opens raw connections from resolved parameters.
///
/// Open failures propagate to the caller unmodified; the pool performs no
/// retry and no backoff.
pub trait Connector: Send + Sync + 'static {
    type Conn: RawConnection;

    fn connect(&self, params: &ConnectParams) -> DbResult<Self::Conn>;
}

/// One open session to the database server.
///
/// All methods block the calling thread for the duration of any network
/// round trip; the driver's own connect/read timeouts apply.
pub trait RawConnection: Send + 'static {
    /// Close the session. Best effort; errors are the driver's to log.
    fn close(&mut self);

    /// Lightweight keepalive. With `reconnect` set, a dead session is
    /// transparently re-established instead of failing.
    fn ping(&mut self, reconnect: bool) -> DbResult<()>;

    /// Create a fresh query cursor on this session.
    fn cursor(&mut self) -> DbResult<Box<dyn QueryCursor + '_>>;

    /// Current auto-commit flag.
    fn autocommit(&self) -> bool;

    /// Toggle auto-commit on the session.
    fn set_autocommit(&mut self, enabled: bool) -> DbResult<()>;

    /// Explicitly begin a transaction.
    fn begin(&mut self) -> DbResult<()>;

    /// Commit the open transaction.
    fn commit(&mut self) -> DbResult<()>;

    /// Roll back the open transaction.
    fn rollback(&mut self) -> DbResult<()>;
}

/// A query cursor scoped to one statement exchange.
pub trait QueryCursor {
    /// Execute one statement; returns the affected row count.
    fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<u64>;

    /// Execute one statement against each parameter set; returns the total
    /// affected row count.
    fn execute_many(&mut self, sql: &str, param_sets: &[Vec<QueryParam>]) -> DbResult<u64>;

    /// Fetch all rows produced by the last `execute`.
    fn fetch_all(&mut self) -> DbResult<Vec<Row>>;

    /// Auto-generated id of the last inserted row, if the statement
    /// produced one.
    fn last_insert_id(&self) -> Option<u64>;
}

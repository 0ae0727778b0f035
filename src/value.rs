//! Dynamically typed values exchanged with the server.

use chrono::{DateTime, Utc};

/// Nanoseconds per second
const NANOS_PER_SEC: i64 = 1_000_000_000;

/// One column value, bound argument or reply payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL
    Null,
    /// Boolean
    Bool(bool),
    /// Any integer column
    Int(i64),
    /// Any floating point column
    Float(f64),
    /// Text
    Str(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Instant in UTC. Sent as an `(epoch-seconds, nanoseconds)` pair.
    Timestamp(DateTime<Utc>),
    /// Array
    List(Vec<Value>),
}

/// A result row: column values in select order.
pub type Row = Vec<Value>;

impl Value {
    /// Returns true for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer content, if any.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Floating point content, widening integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Text content, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Timestamp content, if any.
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(tm) => Some(*tm),
            _ => None,
        }
    }

    /// List content, if any.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Timestamp(_) => "timestamp",
            Value::List(_) => "list",
        }
    }
}

/// Split an instant into the `(epoch-seconds, nanoseconds)` pair used on the wire.
///
/// The nanosecond part is always in `0..1_000_000_000`, also before the epoch.
pub fn to_timestamp_pair(tm: &DateTime<Utc>) -> (i64, i64) {
    (tm.timestamp(), i64::from(tm.timestamp_subsec_nanos()))
}

/// Rebuild an instant from its wire pair.
///
/// Returns `None` when the nanosecond part is out of range or the instant
/// is not representable.
pub fn from_timestamp_pair(secs: i64, nanos: i64) -> Option<DateTime<Utc>> {
    if !(0..NANOS_PER_SEC).contains(&nanos) {
        return None;
    }
    DateTime::from_timestamp(secs, u32::try_from(nanos).ok()?)
}

/// Turn a column value shaped like a temporal pair into a timestamp.
///
/// The server sends timestamps as a two element integer array, with no
/// schema tag. A genuine two element integer array column is therefore
/// indistinguishable from a timestamp and gets converted too.
pub(crate) fn sniff_timestamp(value: Value) -> Value {
    if let Value::List(items) = &value
        && let [Value::Int(secs), Value::Int(nanos)] = items.as_slice()
        && let Some(tm) = from_timestamp_pair(*secs, *nanos)
    {
        return Value::Timestamp(tm);
    }
    value
}

/// Convert a reply payload list into rows, reconstituting timestamps.
///
/// Elements that are not lists become single-column rows.
pub(crate) fn into_rows(items: Vec<Value>) -> Vec<Row> {
    items
        .into_iter()
        .map(|item| match item {
            Value::List(cols) => cols.into_iter().map(sniff_timestamp).collect(),
            other => vec![other],
        })
        .collect()
}

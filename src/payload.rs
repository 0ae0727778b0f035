//! Interpretation of reply payloads.
//!
//! A string payload is always the server's error message.

use crate::error::{Error, Result};
use crate::protocol::PreparedHandle;
use crate::value::{Row, Value, into_rows};

/// A key or value column of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Server type name, e.g. `bigint`
    pub type_name: String,
}

/// Key and value columns of a table, as reported by `schema`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableSchema {
    /// Primary key columns in key order
    pub keys: Vec<Column>,
    /// Remaining columns
    pub values: Vec<Column>,
}

fn unexpected<T>(what: &str, payload: &Value) -> Result<T> {
    Err(Error::Protocol(format!(
        "expected {}, got {}",
        what,
        payload.kind()
    )))
}

/// Any payload that is not an error.
pub(crate) fn value(payload: Value) -> Result<Value> {
    match payload {
        Value::Str(message) => Err(Error::Query(message)),
        other => Ok(other),
    }
}

/// A result set. Null means no rows.
pub(crate) fn rows(payload: Value) -> Result<Vec<Row>> {
    match value(payload)? {
        Value::List(items) => Ok(into_rows(items)),
        Value::Null => Ok(Vec::new()),
        other => unexpected("result set", &other),
    }
}

/// Acknowledgement of a command without result.
pub(crate) fn unit(payload: Value) -> Result<()> {
    value(payload).map(drop)
}

/// Handle returned by `prepare`.
pub(crate) fn handle(payload: Value) -> Result<PreparedHandle> {
    match value(payload)? {
        Value::Int(handle) => Ok(handle),
        other => unexpected("prepared handle", &other),
    }
}

/// A flat list of names.
pub(crate) fn names(payload: Value) -> Result<Vec<String>> {
    match value(payload)? {
        Value::List(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Str(name) => Ok(name),
                other => unexpected("name", &other),
            })
            .collect(),
        Value::Null => Ok(Vec::new()),
        other => unexpected("list of names", &other),
    }
}

fn columns(list: Value) -> Result<Vec<Column>> {
    let items = match list {
        Value::List(items) => items,
        Value::Null => return Ok(Vec::new()),
        other => return unexpected("column list", &other),
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::List(pair) => match <[Value; 2]>::try_from(pair) {
                Ok([Value::Str(name), Value::Str(type_name)]) => Ok(Column { name, type_name }),
                Ok(other) => Err(Error::Protocol(format!(
                    "invalid column description: {:?}",
                    other
                ))),
                Err(pair) => Err(Error::Protocol(format!(
                    "column description has {} elements",
                    pair.len()
                ))),
            },
            other => unexpected("column description", &other),
        })
        .collect()
}

/// `[[[name, type], ...], [[name, type], ...]]`
pub(crate) fn schema(payload: Value) -> Result<TableSchema> {
    match value(payload)? {
        Value::List(parts) => {
            let mut parts = parts.into_iter();
            let keys = columns(parts.next().unwrap_or(Value::Null))?;
            let values = columns(parts.next().unwrap_or(Value::Null))?;
            Ok(TableSchema { keys, values })
        }
        other => unexpected("table schema", &other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: Vec<Value>) -> Value {
        Value::List(items)
    }

    fn s(v: &str) -> Value {
        Value::Str(v.into())
    }

    #[test]
    fn test_error_string() {
        let err = rows(s("syntax error")).unwrap_err();
        assert_eq!(err.query_message(), Some("syntax error"));
        assert!(handle(s("No permission")).is_err());
    }

    #[test]
    fn test_rows() {
        assert_eq!(rows(Value::Null).unwrap(), Vec::<Row>::new());
        assert_eq!(
            rows(list(vec![list(vec![Value::Int(1)]), Value::Int(2)])).unwrap(),
            vec![vec![Value::Int(1)], vec![Value::Int(2)]]
        );
        assert!(matches!(rows(Value::Int(3)), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_schema() {
        let payload = list(vec![
            list(vec![list(vec![s("sec"), s("bigint")])]),
            list(vec![
                list(vec![s("px"), s("double")]),
                list(vec![s("tm"), s("timestamp")]),
            ]),
        ]);
        let schema = schema(payload).unwrap();
        assert_eq!(schema.keys.len(), 1);
        assert_eq!(schema.keys[0].name, "sec");
        assert_eq!(schema.values[1].type_name, "timestamp");
    }

    #[test]
    fn test_names() {
        assert_eq!(
            names(list(vec![s("a"), s("b")])).unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
        assert!(names(list(vec![Value::Int(1)])).is_err());
    }
}

//! BSON encoding of commands and decoding of replies.
//!
//! Documents use positional string keys:
//!
//! | key | command | reply |
//! |-----|---------|-------|
//! | `"0"` | ticket | ticket |
//! | `"1"` | command kind | payload (error string or result) |
//! | `"2"` | SQL / handle / argument | cached reply document (binary) |
//! | `"3"` | arguments | |
//! | `"4"` | result cache flag | |

use bson::spec::BinarySubtype;
use bson::{Binary, Bson, Document};
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::value::{Value, to_timestamp_pair};

use super::command::{Command, Statement};
use super::types::Ticket;

const KEY_TICKET: &str = "0";
const KEY_KIND: &str = "1";
const KEY_PAYLOAD: &str = "1";
const KEY_TARGET: &str = "2";
const KEY_CACHED: &str = "2";
const KEY_ARGS: &str = "3";
const KEY_CACHE: &str = "4";

/// A decoded reply document.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Ticket of the command this reply answers
    pub ticket: Ticket,
    /// Error message (`Value::Str`) or result
    pub payload: Value,
}

/// Encode an integer the way the server expects: int32 when it fits.
pub fn int_to_bson(v: i64) -> Bson {
    match i32::try_from(v) {
        Ok(small) => Bson::Int32(small),
        Err(_) => Bson::Int64(v),
    }
}

/// Convert a value for sending. Timestamps become `[secs, nanos]`.
pub fn value_to_bson(value: &Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(v) => Bson::Boolean(*v),
        Value::Int(v) => int_to_bson(*v),
        Value::Float(v) => Bson::Double(*v),
        Value::Str(s) => Bson::String(s.clone()),
        Value::Bytes(b) => Bson::Binary(Binary {
            subtype: BinarySubtype::Generic,
            bytes: b.clone(),
        }),
        Value::Timestamp(tm) => {
            let (secs, nanos) = to_timestamp_pair(tm);
            Bson::Array(vec![int_to_bson(secs), int_to_bson(nanos)])
        }
        Value::List(items) => Bson::Array(items.iter().map(value_to_bson).collect()),
    }
}

/// Convert a received BSON value.
pub fn bson_to_value(bson: Bson) -> Result<Value> {
    Ok(match bson {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(v) => Value::Bool(v),
        Bson::Int32(v) => Value::Int(i64::from(v)),
        Bson::Int64(v) => Value::Int(v),
        Bson::Double(v) => Value::Float(v),
        Bson::String(s) => Value::Str(s),
        Bson::Binary(bin) => Value::Bytes(bin.bytes),
        Bson::DateTime(dt) => {
            let millis = dt.timestamp_millis();
            Value::Timestamp(DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(
                || Error::Protocol(format!("datetime out of range: {}", millis)),
            )?)
        }
        Bson::Array(items) => Value::List(
            items
                .into_iter()
                .map(bson_to_value)
                .collect::<Result<Vec<_>>>()?,
        ),
        other => {
            return Err(Error::Protocol(format!(
                "unsupported bson element: {:?}",
                other.element_type()
            )));
        }
    })
}

fn args_to_bson(args: &[Value]) -> Bson {
    Bson::Array(args.iter().map(value_to_bson).collect())
}

/// Build the document for one command.
pub fn command_document(ticket: Ticket, command: &Command) -> Document {
    let mut doc = Document::new();
    doc.insert(KEY_TICKET, int_to_bson(ticket));
    doc.insert(KEY_KIND, command.kind().as_str());
    match command {
        Command::Run {
            statement,
            args,
            cache,
        } => {
            match statement {
                Statement::Text(sql) => doc.insert(KEY_TARGET, sql.as_str()),
                Statement::Prepared(handle) => doc.insert(KEY_TARGET, int_to_bson(*handle)),
            };
            doc.insert(KEY_ARGS, args_to_bson(args));
            if *cache {
                doc.insert(KEY_CACHE, Bson::Int32(1));
            }
        }
        Command::Prepare { sql } => {
            doc.insert(KEY_TARGET, sql.as_str());
        }
        Command::Batch { handle, rows } => {
            doc.insert(KEY_TARGET, int_to_bson(*handle));
            doc.insert(
                KEY_ARGS,
                Bson::Array(rows.iter().map(|row| args_to_bson(row)).collect()),
            );
        }
        Command::Use { database } => {
            doc.insert(KEY_TARGET, database.as_str());
        }
        Command::Login {
            user,
            password,
            database,
        } => {
            let arg = match database {
                Some(database) => format!("{} {} {}", user, password, database),
                None => format!("{} {}", user, password),
            };
            doc.insert(KEY_TARGET, arg);
        }
        Command::Meta(meta) => {
            doc.insert(KEY_TARGET, meta.to_arg());
        }
    }
    doc
}

/// Encode one command as a frame body (no length prefix).
pub fn encode_command(ticket: Ticket, command: &Command, out: &mut Vec<u8>) -> Result<()> {
    command_document(ticket, command).to_writer(out)?;
    Ok(())
}

fn ticket_of(doc: &Document) -> Result<Ticket> {
    match doc.get(KEY_TICKET) {
        Some(Bson::Int32(v)) => Ok(i64::from(*v)),
        Some(Bson::Int64(v)) => Ok(*v),
        Some(Bson::Double(v)) if v.fract() == 0.0 => Ok(*v as i64),
        other => Err(Error::Protocol(format!("invalid ticket: {:?}", other))),
    }
}

/// Take the payload of a reply document.
///
/// A reply served from the server's result cache carries the complete
/// cached reply document in the secondary field instead of a payload.
fn payload_of(mut doc: Document) -> Result<Bson> {
    match doc.remove(KEY_CACHED) {
        Some(Bson::Binary(bin)) => {
            let mut cached_body = bin.bytes.as_slice();
            let cached = Document::from_reader(&mut cached_body)?;
            payload_of(cached)
        }
        Some(Bson::Document(cached)) => payload_of(cached),
        Some(other) => Err(Error::Protocol(format!(
            "invalid cached reply: {:?}",
            other.element_type()
        ))),
        None => Ok(doc.remove(KEY_PAYLOAD).unwrap_or(Bson::Null)),
    }
}

/// Decode a document frame body into a reply.
pub fn decode_reply(mut body: &[u8]) -> Result<Reply> {
    let doc = Document::from_reader(&mut body)?;
    let ticket = ticket_of(&doc)?;
    let payload = bson_to_value(payload_of(doc)?)?;
    Ok(Reply { ticket, payload })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::command::MetaCommand;
    use bson::doc;
    use chrono::TimeZone;

    fn to_bytes(doc: &Document) -> Vec<u8> {
        let mut out = Vec::new();
        doc.to_writer(&mut out).unwrap();
        out
    }

    #[test]
    fn test_run_prepared_document() {
        let tm = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let cmd = Command::run_prepared(
            4,
            vec![Value::Int(1), Value::Timestamp(tm), Value::Int(1 << 40)],
            true,
        );
        let doc = command_document(9, &cmd);
        assert_eq!(doc.get("0"), Some(&Bson::Int32(9)));
        assert_eq!(doc.get_str("1").unwrap(), "run");
        assert_eq!(doc.get("2"), Some(&Bson::Int32(4)));
        assert_eq!(
            doc.get_array("3").unwrap(),
            &vec![
                Bson::Int32(1),
                Bson::Array(vec![Bson::Int32(1_704_164_645), Bson::Int32(0)]),
                Bson::Int64(1 << 40),
            ]
        );
        assert_eq!(doc.get("4"), Some(&Bson::Int32(1)));
    }

    #[test]
    fn test_run_sql_without_cache() {
        let doc = command_document(1, &Command::run_sql("select 1", false));
        assert_eq!(doc.get_str("2").unwrap(), "select 1");
        assert!(doc.get_array("3").unwrap().is_empty());
        assert!(doc.get("4").is_none());
    }

    #[test]
    fn test_login_and_meta_arguments() {
        let login = Command::login("bob", "pw", Some("test".into())).unwrap();
        assert_eq!(command_document(1, &login).get_str("2").unwrap(), "bob pw test");
        let meta = Command::meta(MetaCommand::Schema("bars".into())).unwrap();
        let doc = command_document(2, &meta);
        assert_eq!(doc.get_str("1").unwrap(), "meta");
        assert_eq!(doc.get_str("2").unwrap(), "schema bars");
    }

    #[test]
    fn test_batch_document() {
        let cmd = Command::batch(2, vec![vec![Value::Int(1)], vec![Value::Int(2)]]).unwrap();
        let doc = command_document(3, &cmd);
        assert_eq!(doc.get_str("1").unwrap(), "batch");
        assert_eq!(doc.get_array("3").unwrap().len(), 2);
    }

    #[test]
    fn test_decode_result_set() {
        let body = to_bytes(&doc! { "0": 7_i32, "1": [[1_i32]] });
        let reply = decode_reply(&body).unwrap();
        assert_eq!(reply.ticket, 7);
        assert_eq!(
            reply.payload,
            Value::List(vec![Value::List(vec![Value::Int(1)])])
        );
    }

    #[test]
    fn test_decode_error_string() {
        let body = to_bytes(&doc! { "0": 8_i64, "1": "syntax error" });
        let reply = decode_reply(&body).unwrap();
        assert_eq!(reply.ticket, 8);
        assert_eq!(reply.payload, Value::Str("syntax error".into()));
    }

    #[test]
    fn test_decode_null_payload() {
        let body = to_bytes(&doc! { "0": 3_i32, "1": Bson::Null });
        assert_eq!(decode_reply(&body).unwrap().payload, Value::Null);
    }

    #[test]
    fn test_decode_cached_payload() {
        let cached = Binary {
            subtype: BinarySubtype::Generic,
            bytes: to_bytes(&doc! { "0": 1_i32, "1": [[42_i32, "x"]] }),
        };
        let body = to_bytes(&doc! { "0": 11_i32, "2": cached });
        let reply = decode_reply(&body).unwrap();
        assert_eq!(reply.ticket, 11);
        assert_eq!(
            reply.payload,
            Value::List(vec![Value::List(vec![Value::Int(42), Value::Str("x".into())])])
        );
    }

    #[test]
    fn test_decode_rejects_missing_ticket() {
        let body = to_bytes(&doc! { "1": "x" });
        assert!(decode_reply(&body).is_err());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_reply(b"not bson").is_err());
    }
}

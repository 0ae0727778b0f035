//! Error types for opentick-client.

use std::io;

use thiserror::Error;

/// Result type for opentick-client operations.
pub type Result<T> = core::result::Result<T, Error>;

/// A connection-level fault.
///
/// One fault is broadcast to every waiter of a connection, so unlike
/// [`std::io::Error`] it is cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    /// Socket read or write failed
    #[error("{message}")]
    Io {
        /// Kind of the underlying I/O error
        kind: io::ErrorKind,
        /// Rendered I/O error
        message: String,
    },

    /// The server closed the socket
    #[error("Connection reset by peer")]
    ResetByPeer,

    /// A frame body could not be decoded as a result document
    #[error("Invalid frame: {0}")]
    Decode(String),

    /// The connection was closed by the caller
    #[error("Connection closed")]
    Closed,

    /// No socket is currently established (reconnecting or never connected)
    #[error("Not connected")]
    NotConnected,
}

impl From<io::Error> for Fault {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted => Fault::ResetByPeer,
            kind => Fault::Io {
                kind,
                message: err.to_string(),
            },
        }
    }
}

/// Error type for opentick-client.
#[derive(Debug, Error)]
pub enum Error {
    /// The caller-side wait elapsed; the request may still complete later
    #[error("Timeout")]
    Timeout,

    /// The server answered with an error message instead of a result
    #[error("{0}")]
    Query(String),

    /// Connection-level fault, shared by every pending request
    #[error("Connection error: {0}")]
    Connection(Fault),

    /// Protocol error (malformed or unexpected reply)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A value could not be converted to the requested type
    #[error("Decode error: {0}")]
    Decode(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid usage (e.g., batch insert without rows)
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),
}

impl Error {
    /// Returns true if the error means the socket the request went out on is gone.
    pub fn is_connection_broken(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Connection(_))
    }

    /// Returns true if the caller-side wait timed out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }

    /// Get the server's message if this is a query error.
    pub fn query_message(&self) -> Option<&str> {
        match self {
            Error::Query(message) => Some(message),
            _ => None,
        }
    }
}

impl From<Fault> for Error {
    fn from(fault: Fault) -> Self {
        Error::Connection(fault)
    }
}

impl From<core::convert::Infallible> for Error {
    fn from(never: core::convert::Infallible) -> Self {
        match never {}
    }
}

impl From<bson::de::Error> for Error {
    fn from(err: bson::de::Error) -> Self {
        Error::Protocol(format!("bson decode error: {err}"))
    }
}

impl From<bson::ser::Error> for Error {
    fn from(err: bson::ser::Error) -> Self {
        Error::Protocol(format!("bson encode error: {err}"))
    }
}

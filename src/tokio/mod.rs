//! Asynchronous OpenTick client using Tokio.
//!
//! The socket is still read by the connection's dispatch thread; only the
//! waiting is asynchronous.

mod conn;
mod future;

pub use conn::Conn;
pub use future::{PendingResult, RangeResults};

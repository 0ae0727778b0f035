//! Synchronous OpenTick client.

mod conn;
mod future;

pub use conn::Conn;
pub use future::{PendingResult, RangeResults};

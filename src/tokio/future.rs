//! Awaitable result handles.

use std::time::Duration;

use crate::error::Result;
use crate::payload;
use crate::protocol::Ticket;
use crate::range::stitch;
use crate::session::Pending;
use crate::value::{Row, Value};

/// Handle to the result of one submitted command.
///
/// Waiting does not block the runtime; the handle is woken whenever the
/// dispatch thread deposits a reply.
#[derive(Debug)]
pub struct PendingResult {
    pending: Pending,
}

impl PendingResult {
    pub(crate) fn new(pending: Pending) -> Self {
        Self { pending }
    }

    /// Ticket the command was sent with.
    pub fn ticket(&self) -> Ticket {
        self.pending.ticket()
    }

    /// Await the result rows. `None` waits forever.
    pub async fn get(&mut self, timeout: Option<Duration>) -> Result<Vec<Row>> {
        payload::rows(self.pending.wait_async(timeout).await?)
    }

    /// Await the raw reply payload.
    pub async fn get_value(&mut self, timeout: Option<Duration>) -> Result<Value> {
        payload::value(self.pending.wait_async(timeout).await?)
    }

    /// Await a reply that carries no result.
    pub async fn wait(&mut self, timeout: Option<Duration>) -> Result<()> {
        payload::unit(self.pending.wait_async(timeout).await?)
    }
}

/// Results of a query fanned out over several sub-ranges.
#[derive(Debug)]
pub struct RangeResults {
    parts: Vec<PendingResult>,
}

impl RangeResults {
    pub(crate) fn new(parts: Vec<PendingResult>) -> Self {
        Self { parts }
    }

    /// Number of sub-range queries.
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Returns true if no query was issued.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Await every sub-range in order and concatenate their rows.
    pub async fn get(&mut self, timeout: Option<Duration>) -> Result<Vec<Row>> {
        let mut chunks = Vec::with_capacity(self.parts.len());
        for part in &mut self.parts {
            chunks.push(part.get(timeout).await?);
        }
        Ok(stitch(chunks))
    }
}

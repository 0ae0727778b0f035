//! Blocking result handles.

use std::time::Duration;

use crate::error::Result;
use crate::payload;
use crate::protocol::Ticket;
use crate::range::stitch;
use crate::session::Pending;
use crate::value::{Row, Value};

/// Handle to the result of one submitted command.
///
/// The result can be taken once. A timed out [`get`](Self::get) may be
/// retried; dropping the handle discards the reply.
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

    /// Wait for the result rows. `None` waits forever.
    ///
    /// Columns shaped like `[seconds, nanoseconds]` are converted to
    /// [`Value::Timestamp`].
    pub fn get(&mut self, timeout: Option<Duration>) -> Result<Vec<Row>> {
        payload::rows(self.pending.wait(timeout)?)
    }

    /// Wait for the raw reply payload, without any row post-processing.
    pub fn get_value(&mut self, timeout: Option<Duration>) -> Result<Value> {
        payload::value(self.pending.wait(timeout)?)
    }

    /// Wait for a reply that carries no result.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<()> {
        payload::unit(self.pending.wait(timeout)?)
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

    /// Wait for every sub-range in order and concatenate their rows.
    ///
    /// `timeout` bounds each sub-range wait separately. A row sitting on a
    /// boundary shared by two sub-ranges is returned once.
    pub fn get(&mut self, timeout: Option<Duration>) -> Result<Vec<Row>> {
        let chunks = self
            .parts
            .iter_mut()
            .map(|part| part.get(timeout))
            .collect::<Result<Vec<_>>>()?;
        Ok(stitch(chunks))
    }
}

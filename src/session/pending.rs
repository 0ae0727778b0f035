use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::Ticket;
use crate::value::Value;

use super::Session;
use super::registry::Claim;

/// One outstanding request, shared core of the facades' result handles.
///
/// Dropping an unanswered request tells the registry to discard its reply.
#[derive(Debug)]
pub(crate) struct Pending {
    session: Arc<Session>,
    claim: Claim,
    settled: bool,
}

impl Pending {
    pub(super) fn new(session: Arc<Session>, claim: Claim) -> Self {
        Self {
            session,
            claim,
            settled: false,
        }
    }

    pub fn ticket(&self) -> Ticket {
        self.claim.ticket
    }

    pub fn epoch(&self) -> u64 {
        self.claim.epoch
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    fn ensure_unsettled(&self) -> Result<()> {
        if self.settled {
            return Err(Error::InvalidUsage(format!(
                "result of ticket {} was already taken",
                self.claim.ticket
            )));
        }
        Ok(())
    }

    fn settle(&mut self, result: Result<Value>) -> Result<Value> {
        if !matches!(result, Err(Error::Timeout)) {
            self.settled = true;
        }
        result
    }

    /// Block until the reply payload arrives.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<Value> {
        self.ensure_unsettled()?;
        let result = self.session.registry.wait(self.claim, timeout);
        self.settle(result)
    }

    /// Await the reply payload without blocking the runtime.
    #[cfg(feature = "tokio")]
    pub async fn wait_async(&mut self, timeout: Option<Duration>) -> Result<Value> {
        self.ensure_unsettled()?;
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        let result = loop {
            let registry = &self.session.registry;
            let mut notified = std::pin::pin!(registry.notified());
            notified.as_mut().enable();
            if let Some(result) = registry.poll(self.claim) {
                break result;
            }
            match deadline {
                None => notified.await,
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        break registry.poll(self.claim).unwrap_or(Err(Error::Timeout));
                    }
                }
            }
        };
        self.settle(result)
    }
}

impl Drop for Pending {
    fn drop(&mut self) {
        if !self.settled {
            self.session.registry.forget(self.claim);
        }
    }
}

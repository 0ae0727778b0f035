//! Ticket registry: allocation, reply slots and the connection fault slot.

use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{Error, Fault, Result};
use crate::protocol::Ticket;
use crate::value::Value;

/// A ticket together with the connection generation it was issued in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Claim {
    pub ticket: Ticket,
    pub epoch: u64,
}

#[derive(Debug)]
struct Slots {
    next_ticket: Ticket,
    epoch: u64,
    replies: HashMap<Ticket, Value>,
    /// Tickets whose waiter went away; their late replies are dropped.
    abandoned: HashSet<Ticket>,
    /// Broadcast fault. Never removed by a reader.
    fault: Option<Fault>,
    /// Fault that ended the previous generation.
    retired: Option<Fault>,
}

impl Slots {
    fn poll(&mut self, claim: Claim) -> Option<Result<Value>> {
        if claim.epoch != self.epoch {
            let fault = self.retired.clone().unwrap_or(Fault::NotConnected);
            return Some(Err(Error::Connection(fault)));
        }
        if let Some(payload) = self.replies.remove(&claim.ticket) {
            return Some(Ok(payload));
        }
        self.fault
            .as_ref()
            .map(|fault| Err(Error::Connection(fault.clone())))
    }
}

/// Pending replies of one connection, shared by the dispatcher and every waiter.
#[derive(Debug)]
pub(crate) struct Registry {
    slots: Mutex<Slots>,
    cond: Condvar,
    #[cfg(feature = "tokio")]
    notify: tokio::sync::Notify,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Slots {
                next_ticket: 1,
                epoch: 0,
                replies: HashMap::new(),
                abandoned: HashSet::new(),
                fault: None,
                retired: None,
            }),
            cond: Condvar::new(),
            #[cfg(feature = "tokio")]
            notify: tokio::sync::Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wake(&self) {
        self.cond.notify_all();
        #[cfg(feature = "tokio")]
        self.notify.notify_waiters();
    }

    /// Issue a fresh ticket, greater than every ticket issued before.
    pub fn allocate(&self) -> Claim {
        let mut slots = self.lock();
        let ticket = slots.next_ticket;
        slots.next_ticket += 1;
        Claim {
            ticket,
            epoch: slots.epoch,
        }
    }

    /// Current connection generation.
    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Store a reply and wake all waiters.
    pub fn deposit(&self, ticket: Ticket, payload: Value) {
        {
            let mut slots = self.lock();
            if slots.abandoned.remove(&ticket) {
                tracing::trace!("dropped reply for abandoned ticket {}", ticket);
                return;
            }
            if slots.replies.insert(ticket, payload).is_some() {
                tracing::warn!("duplicate reply for ticket {}", ticket);
            }
        }
        self.wake();
    }

    /// Broadcast a connection fault to every current and future waiter of
    /// this generation. The first fault wins.
    pub fn broadcast(&self, fault: Fault) {
        {
            let mut slots = self.lock();
            if slots.fault.is_none() {
                slots.fault = Some(fault);
            }
        }
        self.wake();
    }

    /// Current broadcast fault, if any.
    pub fn fault(&self) -> Option<Fault> {
        self.lock().fault.clone()
    }

    /// Start a new generation: drop every pending reply and the fault slot.
    ///
    /// Claims of the old generation fail with the fault that ended it.
    pub fn reset(&self) {
        {
            let mut slots = self.lock();
            slots.replies.clear();
            slots.abandoned.clear();
            if let Some(fault) = slots.fault.take() {
                slots.retired = Some(fault);
            }
            slots.epoch += 1;
        }
        self.wake();
    }

    /// Take the reply for `claim`, or the broadcast fault.
    pub fn poll(&self, claim: Claim) -> Option<Result<Value>> {
        self.lock().poll(claim)
    }

    /// Block until `claim` is answered, a fault is broadcast, or `timeout` elapses.
    pub fn wait(&self, claim: Claim, timeout: Option<Duration>) -> Result<Value> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut slots = self.lock();
        loop {
            if let Some(result) = slots.poll(claim) {
                return result;
            }
            slots = match deadline {
                None => self.cond.wait(slots).unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::Timeout);
                    }
                    self.cond
                        .wait_timeout(slots, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    /// Give up on `claim`. A reply that already arrived is dropped, a late
    /// one will be.
    pub fn forget(&self, claim: Claim) {
        let mut slots = self.lock();
        if claim.epoch == slots.epoch && slots.replies.remove(&claim.ticket).is_none() {
            slots.abandoned.insert(claim.ticket);
        }
    }

    /// Future resolving on the next deposit, broadcast or reset.
    #[cfg(feature = "tokio")]
    pub fn notified(&self) -> tokio::sync::futures::Notified<'_> {
        self.notify.notified()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_tickets_increase_across_threads() {
        let registry = Arc::new(Registry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    (0..100)
                        .map(|_| registry.allocate().ticket)
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut all = Vec::new();
        for handle in handles {
            let tickets = handle.join().unwrap();
            assert!(tickets.windows(2).all(|w| w[0] < w[1]));
            all.extend(tickets);
        }
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 800);
        assert_eq!(all[0], 1);
    }

    #[test]
    fn test_take_removes_reply() {
        let registry = Registry::new();
        let claim = registry.allocate();
        registry.deposit(claim.ticket, Value::Int(1));
        assert_eq!(registry.poll(claim).unwrap().unwrap(), Value::Int(1));
        assert!(registry.poll(claim).is_none());
    }

    #[test]
    fn test_fault_is_seen_by_every_waiter() {
        let registry = Registry::new();
        let a = registry.allocate();
        let b = registry.allocate();
        registry.broadcast(Fault::ResetByPeer);
        registry.broadcast(Fault::Closed);
        for claim in [a, b, a] {
            let err = registry.wait(claim, Some(Duration::ZERO)).unwrap_err();
            assert!(matches!(err, Error::Connection(Fault::ResetByPeer)));
        }
    }

    #[test]
    fn test_reply_wins_over_later_fault() {
        let registry = Registry::new();
        let claim = registry.allocate();
        registry.deposit(claim.ticket, Value::Null);
        registry.broadcast(Fault::ResetByPeer);
        assert_eq!(registry.poll(claim).unwrap().unwrap(), Value::Null);
    }

    #[test]
    fn test_reset_retires_old_claims() {
        let registry = Registry::new();
        let old = registry.allocate();
        registry.deposit(old.ticket, Value::Int(1));
        registry.broadcast(Fault::ResetByPeer);
        registry.reset();
        assert!(registry.fault().is_none());
        let err = registry.poll(old).unwrap().unwrap_err();
        assert!(matches!(err, Error::Connection(Fault::ResetByPeer)));

        let fresh = registry.allocate();
        assert!(fresh.ticket > old.ticket);
        assert!(registry.poll(fresh).is_none());
    }

    #[test]
    fn test_wait_times_out() {
        let registry = Registry::new();
        let claim = registry.allocate();
        let start = Instant::now();
        let err = registry
            .wait(claim, Some(Duration::from_millis(10)))
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_wait_wakes_on_deposit() {
        let registry = Arc::new(Registry::new());
        let claim = registry.allocate();
        let waiter = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.wait(claim, Some(Duration::from_secs(5))))
        };
        thread::sleep(Duration::from_millis(20));
        registry.deposit(claim.ticket, Value::Str("done".into()));
        assert_eq!(
            waiter.join().unwrap().unwrap(),
            Value::Str("done".into())
        );
    }

    #[test]
    fn test_forgotten_ticket_drops_late_reply() {
        let registry = Registry::new();
        let claim = registry.allocate();
        registry.forget(claim);
        registry.deposit(claim.ticket, Value::Int(1));
        assert!(registry.poll(claim).is_none());
    }
}

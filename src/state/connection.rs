//! Connection lifecycle state machine.
//!
//! ```text
//! Uninitialized → Connecting → Connected ⇄ Disconnected
//!                                   ↓            ↓
//!                                 Closed ←───────┘
//! ```
//!
//! `Closed` is terminal and reachable from every state.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Before the first connection attempt
    Uninitialized,
    /// Socket open, initial handshake in progress
    Connecting,
    /// Steady state
    Connected,
    /// Socket lost; reconnecting if enabled
    Disconnected,
    /// Explicitly closed
    Closed,
}

impl ConnectionState {
    /// Whether `self → next` is a legal transition.
    pub fn can_transition(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Uninitialized, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
                | (Disconnected, Connected)
                | (Uninitialized | Connecting | Connected | Disconnected, Closed)
        )
    }

    /// Commands may be submitted only once startup has settled.
    pub fn is_settled(self) -> bool {
        !matches!(self, ConnectionState::Uninitialized | ConnectionState::Connecting)
    }
}

/// Shared state cell. Waiters are woken on every transition.
#[derive(Debug)]
pub struct StateCell {
    state: Mutex<ConnectionState>,
    cond: Condvar,
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    /// Create a cell in `Uninitialized`.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ConnectionState::Uninitialized),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state.
    pub fn get(&self) -> ConnectionState {
        *self.lock()
    }

    /// Move to `next` if the transition is legal. Returns whether it happened.
    pub fn transition(&self, next: ConnectionState) -> bool {
        let mut state = self.lock();
        if !state.can_transition(next) {
            if *state != next {
                tracing::debug!("ignored state transition {:?} -> {:?}", *state, next);
            }
            return false;
        }
        *state = next;
        self.cond.notify_all();
        true
    }

    /// Move `from → next` only if the current state is still `from`.
    pub fn transition_from(&self, from: ConnectionState, next: ConnectionState) -> bool {
        let mut state = self.lock();
        if *state != from || !from.can_transition(next) {
            return false;
        }
        *state = next;
        self.cond.notify_all();
        true
    }

    /// Block until startup has settled or `timeout` elapses; returns the state seen last.
    pub fn wait_settled(&self, timeout: Option<Duration>) -> ConnectionState {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.lock();
        while !state.is_settled() {
            state = match deadline {
                None => self.cond.wait(state).unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    self.cond
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
        *state
    }

    /// Sleep for `interval` unless the cell is closed meanwhile.
    ///
    /// Returns true if the cell is closed.
    pub fn sleep_unless_closed(&self, interval: Duration) -> bool {
        let deadline = Instant::now() + interval;
        let mut state = self.lock();
        loop {
            if *state == ConnectionState::Closed {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .cond
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_lifecycle() {
        let cell = StateCell::new();
        assert!(cell.transition(ConnectionState::Connecting));
        assert!(cell.transition(ConnectionState::Connected));
        assert!(cell.transition(ConnectionState::Disconnected));
        assert!(cell.transition(ConnectionState::Connected));
        assert!(cell.transition(ConnectionState::Closed));
        assert_eq!(cell.get(), ConnectionState::Closed);
    }

    #[test]
    fn test_closed_is_terminal() {
        let cell = StateCell::new();
        assert!(cell.transition(ConnectionState::Closed));
        assert!(!cell.transition(ConnectionState::Connecting));
        assert!(!cell.transition(ConnectionState::Connected));
        assert_eq!(cell.get(), ConnectionState::Closed);
    }

    #[test]
    fn test_cannot_skip_handshake() {
        let cell = StateCell::new();
        assert!(!cell.transition(ConnectionState::Connected));
        assert_eq!(cell.get(), ConnectionState::Uninitialized);
    }

    #[test]
    fn test_transition_from_requires_expected_state() {
        let cell = StateCell::new();
        cell.transition(ConnectionState::Connecting);
        cell.transition(ConnectionState::Disconnected);
        assert!(!cell.transition_from(ConnectionState::Connecting, ConnectionState::Connected));
        assert_eq!(cell.get(), ConnectionState::Disconnected);
        assert!(cell.transition_from(ConnectionState::Disconnected, ConnectionState::Connected));
    }

    #[test]
    fn test_wait_settled_wakes_on_connected() {
        let cell = Arc::new(StateCell::new());
        cell.transition(ConnectionState::Connecting);
        let waiter = {
            let cell = Arc::clone(&cell);
            thread::spawn(move || cell.wait_settled(Some(Duration::from_secs(5))))
        };
        thread::sleep(Duration::from_millis(20));
        cell.transition(ConnectionState::Connected);
        assert_eq!(waiter.join().unwrap(), ConnectionState::Connected);
    }

    #[test]
    fn test_wait_settled_times_out() {
        let cell = StateCell::new();
        let state = cell.wait_settled(Some(Duration::from_millis(10)));
        assert_eq!(state, ConnectionState::Uninitialized);
    }

    #[test]
    fn test_sleep_interrupted_by_close() {
        let cell = Arc::new(StateCell::new());
        let sleeper = {
            let cell = Arc::clone(&cell);
            thread::spawn(move || {
                let start = Instant::now();
                (cell.sleep_unless_closed(Duration::from_secs(10)), start.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(20));
        cell.transition(ConnectionState::Closed);
        let (closed, elapsed) = sleeper.join().unwrap();
        assert!(closed);
        assert!(elapsed < Duration::from_secs(5));
    }
}

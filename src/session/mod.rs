//! Connection core shared by the sync and tokio facades.
//!
//! A [`Session`] owns the socket write half, the ticket registry, the
//! prepared-statement cache and the connection state. One dispatch thread
//! per session owns the read half, deposits replies into the registry and
//! reconnects after socket faults.

mod dispatch;
mod pending;
mod registry;
mod transport;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{Error, Fault, Result};
use crate::opts::Opts;
use crate::protocol::command::Command;
use crate::protocol::{PreparedHandle, encode_command};
use crate::state::{ConnectionState, StateCell};
use crate::value::Value;

pub(crate) use pending::Pending;
use registry::Registry;
use transport::{FrameReader, Writer};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared connection core.
#[derive(Debug)]
pub(crate) struct Session {
    opts: Mutex<Opts>,
    transport: Writer,
    registry: Registry,
    prepared: Mutex<HashMap<String, PreparedHandle>>,
    state: StateCell,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    fn new(opts: Opts) -> Self {
        Self {
            opts: Mutex::new(opts),
            transport: Writer::default(),
            registry: Registry::new(),
            prepared: Mutex::new(HashMap::new()),
            state: StateCell::new(),
            dispatcher: Mutex::new(None),
        }
    }

    /// Connect, start the dispatch thread and run the session setup.
    ///
    /// Returns once the connection is established and the login or
    /// database selection (if configured) succeeded.
    pub fn connect(opts: Opts) -> Result<Arc<Self>> {
        let session = Arc::new(Self::new(opts));
        session.state.transition(ConnectionState::Connecting);
        match session.start() {
            Ok(()) => Ok(session),
            Err(e) => {
                session.close();
                Err(e)
            }
        }
    }

    fn start(self: &Arc<Self>) -> Result<()> {
        let opts = self.opts();
        tracing::info!("connecting to {}:{}", opts.host_or_default(), opts.port);
        let stream = transport::open(&opts, opts.timeout)?;
        let reader = FrameReader::new(stream.try_clone()?);
        self.transport.install(stream)?;
        let handle = dispatch::spawn(Arc::clone(self), reader)?;
        *lock(&self.dispatcher) = Some(handle);

        if let Some(command) = self.handshake_command()? {
            let mut pending = self.send(&command)?;
            if let Value::Str(message) = pending.wait(opts.timeout)? {
                return Err(Error::Query(message));
            }
        }
        self.transport.set_read_timeout(Some(opts.poll_interval))?;

        if !self
            .state
            .transition_from(ConnectionState::Connecting, ConnectionState::Connected)
        {
            let fault = self.registry.fault().unwrap_or(Fault::NotConnected);
            return Err(Error::Connection(fault));
        }
        tracing::info!("connected");
        Ok(())
    }

    /// Snapshot of the current options.
    pub fn opts(&self) -> Opts {
        lock(&self.opts).clone()
    }

    /// Update the stored options (credentials, database, reconnect interval).
    pub fn update_opts(&self, f: impl FnOnce(&mut Opts)) {
        f(&mut lock(&self.opts));
    }

    /// Default wait bound.
    pub fn timeout(&self) -> Option<Duration> {
        lock(&self.opts).timeout
    }

    /// Whether `run` commands request the server-side result cache.
    pub fn use_cache(&self) -> bool {
        lock(&self.opts).use_cache
    }

    fn reconnect_interval(&self) -> Option<Duration> {
        lock(&self.opts).reconnect_interval()
    }

    fn handshake_command(&self) -> Result<Option<Command>> {
        let opts = lock(&self.opts);
        Command::handshake(
            opts.user.as_deref(),
            opts.password.as_deref(),
            opts.database.as_deref(),
        )
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    fn is_closed(&self) -> bool {
        self.state.get() == ConnectionState::Closed
    }

    /// Submit a command.
    ///
    /// Waits while the connection is still starting up; fails immediately
    /// while it is disconnected or closed.
    pub fn submit(self: &Arc<Self>, command: &Command) -> Result<Pending> {
        match self.state.wait_settled(self.timeout()) {
            ConnectionState::Connected => self.send(command),
            ConnectionState::Disconnected => Err(Error::Connection(Fault::NotConnected)),
            ConnectionState::Closed => Err(Error::Connection(Fault::Closed)),
            ConnectionState::Uninitialized | ConnectionState::Connecting => Err(Error::Timeout),
        }
    }

    fn send(self: &Arc<Self>, command: &Command) -> Result<Pending> {
        let claim = self.registry.allocate();
        let mut body = Vec::new();
        encode_command(claim.ticket, command, &mut body)?;
        let pending = Pending::new(Arc::clone(self), claim);
        tracing::trace!("{} ticket {}", command.kind().as_str(), claim.ticket);
        self.transport.send(&body)?;
        Ok(pending)
    }

    /// Cached handle of a prepared statement.
    pub fn prepared(&self, sql: &str) -> Option<PreparedHandle> {
        lock(&self.prepared).get(sql).copied()
    }

    /// Remember a prepared handle obtained in connection generation `epoch`.
    ///
    /// Handles from a connection that has since been replaced are dropped.
    pub fn remember_prepared(&self, sql: &str, handle: PreparedHandle, epoch: u64) {
        let mut prepared = lock(&self.prepared);
        if self.registry.epoch() == epoch {
            prepared.insert(sql.to_string(), handle);
        }
    }

    /// Drop everything bound to the previous socket.
    fn invalidate(&self) {
        self.registry.reset();
        lock(&self.prepared).clear();
    }

    /// Close the connection and wait for the dispatch thread to stop.
    ///
    /// Every waiter observes [`Fault::Closed`]. Idempotent.
    pub fn close(&self) {
        self.shut_down(true);
    }

    /// Close the connection without waiting for the dispatch thread.
    ///
    /// The thread notices within one poll interval and exits on its own.
    pub fn close_detached(&self) {
        self.shut_down(false);
    }

    fn shut_down(&self, join: bool) {
        let closing = self.state.transition(ConnectionState::Closed);
        self.transport.shutdown();
        let handle = lock(&self.dispatcher).take();
        if let Some(handle) = handle
            && join
            && handle.thread().id() != thread::current().id()
            && handle.join().is_err()
        {
            tracing::error!("dispatch thread panicked");
        }
        self.registry.broadcast(Fault::Closed);
        if closing {
            tracing::debug!("connection closed");
        }
    }
}

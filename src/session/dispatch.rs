//! The dispatch thread: sole reader of the socket, and its reconnection supervisor.

use std::io;
use std::net::TcpStream;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{Error, Fault, Result};
use crate::protocol::command::Command;
use crate::protocol::frame::FrameKind;
use crate::protocol::{decode_reply, encode_command};
use crate::state::ConnectionState;
use crate::value::Value;

use super::Session;
use super::transport::{self, FrameReader};

/// Outcome of one dispatch iteration.
#[derive(Debug)]
enum Step {
    /// Keep reading
    Continue,
    /// The socket is unusable
    Fault(Fault),
}

/// Start the dispatch thread reading from `reader`.
pub(super) fn spawn(session: Arc<Session>, reader: FrameReader) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("opentick-dispatch".into())
        .spawn(move || run(&session, reader))
}

fn run(session: &Session, mut reader: FrameReader) {
    loop {
        let fault = loop {
            match step(session, &mut reader) {
                Step::Continue => {}
                Step::Fault(fault) => break fault,
            }
        };
        match recover(session, fault) {
            Some(next) => reader = next,
            None => break,
        }
    }
    tracing::debug!("dispatch loop stopped");
}

fn step(session: &Session, reader: &mut FrameReader) -> Step {
    let alive = || !session.is_closed();
    match reader.read_frame(&alive) {
        Ok(None) if alive() => Step::Continue,
        Ok(None) => Step::Fault(Fault::Closed),
        Ok(Some(FrameKind::Noop)) => Step::Continue,
        Ok(Some(FrameKind::Heartbeat)) => {
            tracing::trace!("heartbeat");
            match session.transport.heartbeat() {
                Ok(()) => Step::Continue,
                Err(fault) => Step::Fault(fault),
            }
        }
        Ok(Some(FrameKind::Document(body))) => match decode_reply(body) {
            Ok(reply) => {
                tracing::trace!("reply for ticket {}", reply.ticket);
                session.registry.deposit(reply.ticket, reply.payload);
                Step::Continue
            }
            Err(e) => {
                tracing::warn!("malformed frame of {} bytes: {}", body.len(), e);
                Step::Fault(Fault::Decode(e.to_string()))
            }
        },
        Err(fault) => Step::Fault(fault),
    }
}

/// Handle a socket fault. Returns the reader of a new connection, or
/// `None` when the dispatch loop should stop for good.
fn recover(session: &Session, fault: Fault) -> Option<FrameReader> {
    session.transport.shutdown();
    if session.is_closed() {
        session.registry.broadcast(Fault::Closed);
        return None;
    }
    tracing::warn!("connection fault: {}", fault);
    session.registry.broadcast(fault);
    session.state.transition(ConnectionState::Disconnected);
    session.invalidate();

    loop {
        let Some(interval) = session.reconnect_interval() else {
            tracing::info!("auto reconnect disabled, dispatch loop exits");
            return None;
        };
        if session.state.sleep_unless_closed(interval) {
            return None;
        }
        match reconnect(session) {
            Ok(reader) => {
                if session
                    .state
                    .transition_from(ConnectionState::Disconnected, ConnectionState::Connected)
                {
                    tracing::info!("reconnected");
                    return Some(reader);
                }
                session.transport.shutdown();
                return None;
            }
            Err(e) => tracing::error!("reconnect failed: {}", e),
        }
    }
}

/// Open a new socket, replay the session setup on it and install it.
fn reconnect(session: &Session) -> Result<FrameReader> {
    let opts = session.opts();
    tracing::info!("reconnecting to {}:{}", opts.host_or_default(), opts.port);
    let stream = transport::open(&opts, Some(opts.poll_interval))?;
    let mut reader = FrameReader::new(stream.try_clone()?);
    if let Some(command) = session.handshake_command()? {
        replay(session, &stream, &mut reader, &command, opts.timeout)?;
    }
    session.transport.install(stream)?;
    Ok(reader)
}

/// Send `command` on a socket nobody else writes to yet and read frames
/// until its reply arrives.
fn replay(
    session: &Session,
    stream: &TcpStream,
    reader: &mut FrameReader,
    command: &Command,
    timeout: Option<Duration>,
) -> Result<()> {
    tracing::info!("replaying {} handshake", command.kind().as_str());
    let claim = session.registry.allocate();
    let mut body = Vec::new();
    encode_command(claim.ticket, command, &mut body)?;
    transport::write_body(stream, &body)?;

    let deadline = timeout.map(|t| Instant::now() + t);
    let alive = || !session.is_closed();
    loop {
        if !alive() {
            return Err(Error::Connection(Fault::Closed));
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(Error::Timeout);
        }
        match reader.read_frame(&alive).map_err(Error::Connection)? {
            None | Some(FrameKind::Noop) => {}
            Some(FrameKind::Heartbeat) => {
                transport::write_heartbeat(stream).map_err(Error::Connection)?;
            }
            Some(FrameKind::Document(frame)) => {
                let reply = decode_reply(frame)?;
                if reply.ticket != claim.ticket {
                    tracing::debug!("ignored reply for ticket {} during handshake", reply.ticket);
                    continue;
                }
                return match reply.payload {
                    Value::Str(message) => Err(Error::Query(message)),
                    _ => Ok(()),
                };
            }
        }
    }
}

//! Socket ownership: the serialized write half and the dispatcher's read half.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::{Error, Fault, Result};
use crate::opts::Opts;
use crate::protocol::frame::{self, FrameKind, LENGTH_PREFIX_LEN};

/// Smallest socket timeout; the OS rejects a zero timeout.
const MIN_SOCKET_TIMEOUT: Duration = Duration::from_millis(1);

fn socket_timeout(timeout: Option<Duration>) -> Option<Duration> {
    timeout.map(|t| t.max(MIN_SOCKET_TIMEOUT))
}

/// Open a socket to the configured server.
///
/// The connect attempt and every write are bounded by [`Opts::timeout`].
/// No-delay is always enabled.
pub(crate) fn open(opts: &Opts, receive_timeout: Option<Duration>) -> Result<TcpStream> {
    let host = opts.host_or_default();
    let mut last_error = None;
    for addr in (host, opts.port).to_socket_addrs()? {
        let attempt = match opts.timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout.max(MIN_SOCKET_TIMEOUT)),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                stream.set_read_timeout(socket_timeout(receive_timeout))?;
                stream.set_write_timeout(socket_timeout(opts.timeout))?;
                tracing::debug!("connected to {}", addr);
                return Ok(stream);
            }
            Err(e) => {
                tracing::debug!("connect to {} failed: {}", addr, e);
                last_error = Some(e);
            }
        }
    }
    Err(Error::Io(last_error.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no address found for {}:{}", host, opts.port),
        )
    })))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn shutdown_stream(stream: &TcpStream) {
    if let Err(e) = stream.shutdown(Shutdown::Both) {
        tracing::debug!("socket shutdown: {}", e);
    }
}

/// Write half. The `stream` mutex is the write lock: one frame in flight at
/// a time. `control` is a clone of the same socket that is never used for
/// writing, so shutting down never waits for a stalled writer.
#[derive(Debug, Default)]
pub(crate) struct Writer {
    stream: Mutex<Option<TcpStream>>,
    control: Mutex<Option<TcpStream>>,
}

impl Writer {
    fn lock(&self) -> MutexGuard<'_, Option<TcpStream>> {
        lock(&self.stream)
    }

    /// Make `stream` the current socket.
    pub fn install(&self, stream: TcpStream) -> Result<()> {
        let control = stream.try_clone()?;
        *self.lock() = Some(stream);
        *lock(&self.control) = Some(control);
        Ok(())
    }

    /// Shut the current socket down in both directions.
    ///
    /// The dispatcher's read half observes this as a closed socket and a
    /// writer blocked in the middle of a frame fails and drops the socket.
    pub fn shutdown(&self) {
        let control = lock(&self.control).take();
        if let Some(control) = control {
            shutdown_stream(&control);
        }
        if let Ok(mut guard) = self.stream.try_lock()
            && let Some(stream) = guard.take()
        {
            shutdown_stream(&stream);
        }
    }

    /// Change the receive timeout of the current socket.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match self.lock().as_ref() {
            Some(stream) => Ok(stream.set_read_timeout(socket_timeout(timeout))?),
            None => Err(Error::Connection(Fault::NotConnected)),
        }
    }

    /// Send one frame holding `body`.
    ///
    /// A failed write is fatal to the socket: it is shut down so the
    /// dispatcher notices and starts reconnecting.
    pub fn send(&self, body: &[u8]) -> Result<()> {
        let mut buf = Vec::with_capacity(LENGTH_PREFIX_LEN + body.len());
        frame::write_frame(&mut buf, body)?;
        self.send_raw(&buf).map_err(Error::Connection)
    }

    /// Answer a heartbeat.
    pub fn heartbeat(&self) -> core::result::Result<(), Fault> {
        self.send_raw(&frame::heartbeat_frame())
    }

    fn send_raw(&self, buf: &[u8]) -> core::result::Result<(), Fault> {
        let mut guard = self.lock();
        let Some(stream) = guard.as_mut() else {
            return Err(Fault::NotConnected);
        };
        match stream.write_all(buf).and_then(|()| stream.flush()) {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!("socket write failed: {}", e);
                shutdown_stream(stream);
                *guard = None;
                Err(Fault::from(e))
            }
        }
    }
}

/// Write one heartbeat frame directly on a socket that is not installed yet.
pub(crate) fn write_heartbeat(mut stream: &TcpStream) -> core::result::Result<(), Fault> {
    stream.write_all(&frame::heartbeat_frame())?;
    Ok(())
}

/// Write one frame directly on a socket that is not installed yet.
pub(crate) fn write_body(mut stream: &TcpStream, body: &[u8]) -> Result<()> {
    let mut buf = Vec::with_capacity(LENGTH_PREFIX_LEN + body.len());
    frame::write_frame(&mut buf, body)?;
    stream
        .write_all(&buf)
        .map_err(|e| Error::Connection(Fault::from(e)))
}

fn is_poll_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Read half, owned by the dispatch thread.
#[derive(Debug)]
pub(crate) struct FrameReader {
    stream: TcpStream,
    body: Vec<u8>,
}

impl FrameReader {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            body: Vec::new(),
        }
    }

    /// Fill `buf` completely.
    ///
    /// A receive timeout before the first byte with `idle_ok` returns
    /// `Ok(false)`. Timeouts in the middle of a frame keep reading as long
    /// as `alive` holds.
    fn fill(
        stream: &mut TcpStream,
        buf: &mut [u8],
        idle_ok: bool,
        alive: &dyn Fn() -> bool,
    ) -> core::result::Result<bool, Fault> {
        let mut pos = 0;
        while pos < buf.len() {
            match stream.read(&mut buf[pos..]) {
                Ok(0) => return Err(Fault::ResetByPeer),
                Ok(n) => pos += n,
                Err(e) if is_poll_timeout(&e) => {
                    if idle_ok && pos == 0 {
                        return Ok(false);
                    }
                    if !alive() {
                        return Err(Fault::Closed);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(Fault::from(e)),
            }
        }
        Ok(true)
    }

    /// Read the next frame. `Ok(None)` means no data arrived within the
    /// receive timeout.
    pub fn read_frame(
        &mut self,
        alive: &dyn Fn() -> bool,
    ) -> core::result::Result<Option<FrameKind<'_>>, Fault> {
        let mut head = [0u8; LENGTH_PREFIX_LEN];
        if !Self::fill(&mut self.stream, &mut head, true, alive)? {
            return Ok(None);
        }
        let len = frame::read_length(&head).map_err(|e| Fault::Decode(e.to_string()))?;
        self.body.clear();
        self.body.resize(len, 0);
        Self::fill(&mut self.stream, &mut self.body, false, alive)?;
        Ok(Some(frame::classify(&self.body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn test_reads_split_frame() {
        let (client, mut server) = pair();
        client
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        let mut reader = FrameReader::new(client);
        let alive = || true;
        assert_eq!(reader.read_frame(&alive).unwrap(), None);

        server.write_all(&[3, 0]).unwrap();
        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            server.write_all(&[0, 0, b'a', b'b', b'c']).unwrap();
            server
        });
        assert_eq!(
            reader.read_frame(&alive).unwrap(),
            Some(FrameKind::Document(b"abc"))
        );
        drop(writer.join().unwrap());
        let end = loop {
            match reader.read_frame(&alive) {
                Ok(None) => continue,
                other => break other.map(|_| ()),
            }
        };
        assert_eq!(end, Err(Fault::ResetByPeer));
    }

    #[test]
    fn test_oversized_frame_is_decode_fault() {
        let (client, mut server) = pair();
        let mut reader = FrameReader::new(client);
        server.write_all(&[0xFF, 0xFF, 0xFF, 0xFF]).unwrap();
        assert!(matches!(
            reader.read_frame(&|| true),
            Err(Fault::Decode(_))
        ));
    }

    #[test]
    fn test_shutdown_does_not_wait_for_blocked_writer() {
        let (client, _server) = pair();
        let writer = std::sync::Arc::new(Writer::default());
        writer.install(client).unwrap();

        // Nobody reads on the server side, so this write fills the socket
        // buffers and blocks while holding the write lock.
        let blocked = {
            let writer = std::sync::Arc::clone(&writer);
            std::thread::spawn(move || writer.send(&vec![0u8; 64 << 20]))
        };
        std::thread::sleep(Duration::from_millis(200));

        let start = std::time::Instant::now();
        writer.shutdown();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(blocked.join().unwrap().is_err());
        assert!(matches!(
            writer.send(b"x"),
            Err(Error::Connection(Fault::NotConnected))
        ));
    }

    #[test]
    fn test_heartbeat_and_noop() {
        let (client, mut server) = pair();
        let mut reader = FrameReader::new(client);
        server.write_all(&[0, 0, 0, 0, 1, 0, 0, 0, b'H']).unwrap();
        let alive = || true;
        assert_eq!(reader.read_frame(&alive).unwrap(), Some(FrameKind::Noop));
        assert_eq!(
            reader.read_frame(&alive).unwrap(),
            Some(FrameKind::Heartbeat)
        );
    }

    #[test]
    fn test_writer_without_socket() {
        let writer = Writer::default();
        assert!(matches!(
            writer.send(b"x"),
            Err(Error::Connection(Fault::NotConnected))
        ));
        assert_eq!(writer.heartbeat(), Err(Fault::NotConnected));
    }

    #[test]
    fn test_writer_frames_body() {
        let (client, mut server) = pair();
        let writer = Writer::default();
        writer.install(client).unwrap();
        writer.send(b"hello").unwrap();
        writer.heartbeat().unwrap();
        let mut buf = [0u8; 14];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"\x05\x00\x00\x00hello\x01\x00\x00\x00H");
    }
}

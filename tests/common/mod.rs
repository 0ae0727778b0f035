//! In-process OpenTick server for integration tests.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bson::spec::BinarySubtype;
use bson::{Binary, Bson, Document, doc};
use opentick_client::Opts;

/// What the server does with one received command.
pub enum Action {
    /// Answer with `{"0": ticket, "1": payload}`
    Reply(Bson),
    /// Answer through the result cache indirection (`"2"` holds the reply)
    Cached(Bson),
    /// Answer after a delay, without blocking later commands
    Later(Duration, Bson),
    /// Never answer
    Silent,
    /// Close the connection
    Hangup,
}

type Handler = dyn Fn(&Document) -> Action + Send + Sync;

type Peer = Arc<Mutex<TcpStream>>;

#[derive(Default)]
struct Shared {
    commands: Mutex<Vec<Document>>,
    peers: Mutex<Vec<Peer>>,
    accepted: AtomicUsize,
    heartbeats: AtomicUsize,
}

pub struct MockServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
}

fn to_bytes(doc: &Document) -> Vec<u8> {
    let mut out = Vec::new();
    doc.to_writer(&mut out).unwrap();
    out
}

fn send_frame(peer: &Peer, body: &[u8]) {
    let mut frame = (body.len() as u32).to_le_bytes().to_vec();
    frame.extend_from_slice(body);
    // The client may already be gone.
    peer.lock().unwrap().write_all(&frame).ok();
}

fn serve(stream: TcpStream, shared: Arc<Shared>, handler: Arc<Handler>) {
    let peer: Peer = Arc::new(Mutex::new(stream.try_clone().unwrap()));
    shared.peers.lock().unwrap().push(Arc::clone(&peer));
    let mut reader = stream;
    loop {
        let mut head = [0u8; 4];
        if reader.read_exact(&mut head).is_err() {
            break;
        }
        let mut body = vec![0u8; u32::from_le_bytes(head) as usize];
        if reader.read_exact(&mut body).is_err() {
            break;
        }
        if body.is_empty() {
            continue;
        }
        if body == b"H" {
            shared.heartbeats.fetch_add(1, Ordering::SeqCst);
            continue;
        }
        let doc = Document::from_reader(&mut body.as_slice()).unwrap();
        shared.commands.lock().unwrap().push(doc.clone());
        let ticket = doc.get("0").cloned().unwrap();
        match handler(&doc) {
            Action::Reply(payload) => {
                send_frame(&peer, &to_bytes(&doc! { "0": ticket, "1": payload }));
            }
            Action::Cached(payload) => {
                let cached = Binary {
                    subtype: BinarySubtype::Generic,
                    bytes: to_bytes(&doc! { "0": ticket.clone(), "1": payload }),
                };
                let reply = doc! { "0": ticket, "2": cached };
                send_frame(&peer, &to_bytes(&reply));
            }
            Action::Later(delay, payload) => {
                let peer = Arc::clone(&peer);
                thread::spawn(move || {
                    thread::sleep(delay);
                    send_frame(&peer, &to_bytes(&doc! { "0": ticket, "1": payload }));
                });
            }
            Action::Silent => {}
            Action::Hangup => {
                peer.lock().unwrap().shutdown(Shutdown::Both).ok();
                break;
            }
        }
    }
}

impl MockServer {
    /// Start a server answering every command with `handler`.
    pub fn start<F>(handler: F) -> Self
    where
        F: Fn(&Document) -> Action + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = Arc::new(Shared::default());
        let handler: Arc<Handler> = Arc::new(handler);
        {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                for stream in listener.incoming() {
                    let Ok(stream) = stream else { break };
                    shared.accepted.fetch_add(1, Ordering::SeqCst);
                    let shared = Arc::clone(&shared);
                    let handler = Arc::clone(&handler);
                    thread::spawn(move || serve(stream, shared, handler));
                }
            });
        }
        Self { addr, shared }
    }

    /// Options pointing at this server with short test timeouts and no reconnection.
    pub fn opts(&self) -> Opts {
        Opts {
            host: "127.0.0.1".into(),
            port: self.addr.port(),
            timeout: Some(Duration::from_secs(5)),
            poll_interval: Duration::from_millis(20),
            auto_reconnect: None,
            ..Default::default()
        }
    }

    /// Every command document received so far, in arrival order.
    pub fn commands(&self) -> Vec<Document> {
        self.shared.commands.lock().unwrap().clone()
    }

    /// Received commands of one kind.
    pub fn commands_of(&self, kind: &str) -> Vec<Document> {
        self.commands()
            .into_iter()
            .filter(|doc| doc.get_str("1").ok() == Some(kind))
            .collect()
    }

    /// Number of accepted connections.
    pub fn accepted(&self) -> usize {
        self.shared.accepted.load(Ordering::SeqCst)
    }

    /// Number of heartbeat frames received from clients.
    pub fn heartbeats(&self) -> usize {
        self.shared.heartbeats.load(Ordering::SeqCst)
    }

    /// Send a heartbeat frame to every connected client.
    pub fn send_heartbeat(&self) {
        for peer in self.shared.peers.lock().unwrap().iter() {
            send_frame(peer, b"H");
        }
    }

    /// Send an empty frame to every connected client.
    pub fn send_noop(&self) {
        for peer in self.shared.peers.lock().unwrap().iter() {
            send_frame(peer, b"");
        }
    }

    /// Send raw bytes as one frame body to every connected client.
    pub fn send_raw(&self, body: &[u8]) {
        for peer in self.shared.peers.lock().unwrap().iter() {
            send_frame(peer, body);
        }
    }

    /// Drop every open connection.
    pub fn kill_connections(&self) {
        for peer in self.shared.peers.lock().unwrap().drain(..) {
            peer.lock().unwrap().shutdown(Shutdown::Both).ok();
        }
    }
}

/// Command kind (`"1"`).
pub fn kind(doc: &Document) -> &str {
    doc.get_str("1").unwrap_or_default()
}

/// SQL text of a `run` or `prepare` command.
pub fn sql(doc: &Document) -> Option<&str> {
    doc.get_str("2").ok()
}

/// Integer target of a command (prepared handle).
pub fn target_int(doc: &Document) -> Option<i64> {
    match doc.get("2") {
        Some(Bson::Int32(v)) => Some(i64::from(*v)),
        Some(Bson::Int64(v)) => Some(*v),
        _ => None,
    }
}

/// Argument array (`"3"`).
pub fn args(doc: &Document) -> Vec<Bson> {
    doc.get_array("3").cloned().unwrap_or_default()
}

/// Ticket (`"0"`).
pub fn ticket(doc: &Document) -> i64 {
    match doc.get("0") {
        Some(Bson::Int32(v)) => i64::from(*v),
        Some(Bson::Int64(v)) => *v,
        other => panic!("bad ticket {:?}", other),
    }
}

/// Integer value of a BSON number.
pub fn int(b: &Bson) -> i64 {
    match b {
        Bson::Int32(v) => i64::from(*v),
        Bson::Int64(v) => *v,
        other => panic!("not an int: {:?}", other),
    }
}

/// A result set from rows of BSON values.
pub fn rows(rows: Vec<Vec<Bson>>) -> Bson {
    Bson::Array(rows.into_iter().map(Bson::Array).collect())
}

/// Answers handshakes with null, `prepare` with handle 0 and anything else with `[[1]]`.
pub fn default_reply(doc: &Document) -> Action {
    match kind(doc) {
        "login" | "use" | "batch" | "meta" => Action::Reply(Bson::Null),
        "prepare" => Action::Reply(Bson::Int32(0)),
        _ => Action::Reply(rows(vec![vec![Bson::Int32(1)]])),
    }
}

/// Poll `cond` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

//! The device connection: one socket, a FIFO send queue, and the
//! pending-request correlation map.
//!
//! The connection owns exactly one live socket at a time. A writer thread
//! drains the outbound queue in strict FIFO order and a reader thread frames
//! inbound documents; both report back through a [`ConnEvent`] channel owned
//! by the manager. Retry policy lives in the manager, not here.

use crate::error::{ConnectionError, ProtocolError, RequestError};
use crate::protocol::{encode, ErrorBody, FrameReader, Message};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use serde_json::Value;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Bounded wait imposed on a pending request, one constant system-wide.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on a single connection attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const READ_BUF_LEN: usize = 4096;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// What the connection reports to its owner.
#[derive(Debug)]
pub enum ConnEvent {
    /// The socket is established and the writer/reader threads are running.
    Connected,
    /// An inbound request or event-notification (responses are routed to
    /// their pending callers and never surface here).
    Inbound(Message),
    /// The socket died unexpectedly. Not emitted for operator-initiated
    /// closes.
    Disconnected(ConnectionError),
}

/// What the remote peer answered.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    Result(Value),
    Error(ErrorBody),
}

/// Terminal outcome delivered to a request's caller, exactly once.
pub type Completion = std::result::Result<ResponseOutcome, RequestError>;

pub struct Connection {
    state: Mutex<ConnState>,
    socket: Mutex<Option<TcpStream>>,
    /// Single synchronized entry point for all producers; the writer thread
    /// is the only consumer, so drain order is FIFO.
    outbound: Mutex<Option<Sender<Vec<u8>>>>,
    pending: Mutex<HashMap<u64, Sender<Completion>>>,
    next_id: AtomicU64,
    events: Sender<ConnEvent>,
    io_threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Connection {
    pub fn new(events: Sender<ConnEvent>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ConnState::Disconnected),
            socket: Mutex::new(None),
            outbound: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            events,
            io_threads: Mutex::new(Vec::new()),
        })
    }

    pub fn state(&self) -> ConnState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// One blocking connection attempt. On failure the state returns to
    /// Disconnected and no retry happens here.
    pub fn connect(self: &Arc<Self>, addr: &str) -> Result<(), ConnectionError> {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state != ConnState::Disconnected {
                return Err(ConnectionError::Io(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "connection attempt while not disconnected",
                )));
            }
            *state = ConnState::Connecting;
        }

        match open_socket(addr).and_then(|stream| self.install(stream)) {
            Ok(()) => {
                *self.state.lock().unwrap_or_else(|e| e.into_inner()) = ConnState::Connected;
                let _ = self.events.send(ConnEvent::Connected);
                Ok(())
            }
            Err(e) => {
                *self.state.lock().unwrap_or_else(|e| e.into_inner()) = ConnState::Disconnected;
                Err(e)
            }
        }
    }

    fn install(self: &Arc<Self>, stream: TcpStream) -> Result<(), ConnectionError> {
        // Reap the previous link's threads; they have exited by now.
        self.join_io_threads();

        let writer_stream = stream.try_clone()?;
        let reader_stream = stream.try_clone()?;
        let (tx, rx) = unbounded::<Vec<u8>>();

        *self.socket.lock().unwrap_or_else(|e| e.into_inner()) = Some(stream);
        *self.outbound.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);

        let conn = Arc::clone(self);
        let writer = thread::Builder::new()
            .name("deckbridge-writer".into())
            .spawn(move || writer_loop(conn, writer_stream, rx))
            .map_err(|e| {
                self.teardown_io();
                ConnectionError::Io(e)
            })?;

        let conn = Arc::clone(self);
        let reader = match thread::Builder::new()
            .name("deckbridge-reader".into())
            .spawn(move || reader_loop(conn, reader_stream))
        {
            Ok(handle) => handle,
            Err(e) => {
                // Dropping the sender in teardown ends the writer loop.
                self.teardown_io();
                let _ = writer.join();
                return Err(ConnectionError::Io(e));
            }
        };

        let mut threads = self.io_threads.lock().unwrap_or_else(|e| e.into_inner());
        threads.push(writer);
        threads.push(reader);
        Ok(())
    }

    /// Enqueue a message for the writer thread. Enqueue-and-return: never
    /// blocks the caller on socket I/O.
    pub fn send(&self, msg: &Message) -> Result<(), ConnectionError> {
        let outbound = self.outbound.lock().unwrap_or_else(|e| e.into_inner());
        if self.state() != ConnState::Connected {
            return Err(ConnectionError::NotConnected);
        }
        match outbound.as_ref() {
            Some(tx) => tx
                .send(encode(msg))
                .map_err(|_| ConnectionError::NotConnected),
            None => Err(ConnectionError::NotConnected),
        }
    }

    /// Send a request and register its completion handle.
    pub fn request(
        self: &Arc<Self>,
        method: &str,
        params: Value,
    ) -> Result<PendingRequest, ConnectionError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = bounded(1);
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);

        if let Err(e) = self.send(&Message::request(id, method, params)) {
            self.pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&id);
            return Err(e);
        }

        Ok(PendingRequest {
            id,
            rx,
            conn: Arc::clone(self),
        })
    }

    /// Number of requests still awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Operator-initiated teardown. Synchronous: on return the socket is
    /// closed, the I/O threads have exited, and every pending request has
    /// been completed with `reason`.
    pub fn close(&self, reason: RequestError) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state == ConnState::Disconnected {
                return;
            }
            *state = ConnState::Closing;
        }
        self.teardown_io();
        self.join_io_threads();
        self.fail_pending(reason);
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = ConnState::Disconnected;
    }

    /// Unexpected socket death, reported by a reader/writer thread.
    fn drop_link(&self, err: ConnectionError) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if matches!(*state, ConnState::Closing | ConnState::Disconnected) {
                return;
            }
            *state = ConnState::Disconnected;
        }
        self.teardown_io();
        self.fail_pending(RequestError::ConnectionLost);
        let _ = self.events.send(ConnEvent::Disconnected(err));
    }

    fn teardown_io(&self) {
        if let Some(stream) = self
            .socket
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            let _ = stream.shutdown(Shutdown::Both);
        }
        // Dropping the sender ends the writer loop.
        self.outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }

    fn join_io_threads(&self) {
        let handles: Vec<JoinHandle<()>> = self
            .io_threads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for handle in handles {
            let _ = handle.join();
        }
    }

    fn fail_pending(&self, reason: RequestError) {
        let entries: Vec<Sender<Completion>> = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, tx)| tx)
            .collect();
        for tx in entries {
            let _ = tx.send(Err(reason));
        }
    }

    fn route_inbound(&self, msg: Message) {
        match msg {
            Message::Response { id, result, error } => {
                let entry = self
                    .pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&id);
                match entry {
                    Some(tx) => {
                        let outcome = match error {
                            Some(body) => ResponseOutcome::Error(body),
                            None => ResponseOutcome::Result(result.unwrap_or(Value::Null)),
                        };
                        let _ = tx.send(Ok(outcome));
                    }
                    None => {
                        // Late or stray response. The connection stays up.
                        let err = ProtocolError::UnknownResponseId(id);
                        tracing::warn!(error = %err, "dropping response");
                    }
                }
            }
            other => {
                let _ = self.events.send(ConnEvent::Inbound(other));
            }
        }
    }
}

/// Completion handle for one outbound request.
pub struct PendingRequest {
    id: u64,
    rx: Receiver<Completion>,
    conn: Arc<Connection>,
}

impl PendingRequest {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Block until the response arrives or `timeout` elapses.
    ///
    /// Completion is exactly-once: whichever side removes the pending entry
    /// first (responder, teardown, or this timeout) decides the outcome.
    pub fn wait(self, timeout: Duration) -> Completion {
        match self.rx.recv_timeout(timeout) {
            Ok(completion) => completion,
            Err(RecvTimeoutError::Timeout) => {
                let removed = self
                    .conn
                    .pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&self.id)
                    .is_some();
                if removed {
                    Err(RequestError::Timeout)
                } else {
                    // A completion raced in just as we timed out.
                    self.rx.recv().unwrap_or(Err(RequestError::ConnectionLost))
                }
            }
            Err(RecvTimeoutError::Disconnected) => Err(RequestError::ConnectionLost),
        }
    }
}

fn open_socket(addr: &str) -> Result<TcpStream, ConnectionError> {
    let sockaddr = addr
        .to_socket_addrs()
        .map_err(|_| ConnectionError::BadAddress(addr.to_string()))?
        .next()
        .ok_or_else(|| ConnectionError::BadAddress(addr.to_string()))?;

    let stream = TcpStream::connect_timeout(&sockaddr, CONNECT_TIMEOUT).map_err(|e| {
        match e.kind() {
            std::io::ErrorKind::ConnectionRefused => ConnectionError::Refused(addr.to_string()),
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                ConnectionError::TimedOut
            }
            _ => ConnectionError::Io(e),
        }
    })?;
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

fn writer_loop(conn: Arc<Connection>, mut stream: TcpStream, rx: Receiver<Vec<u8>>) {
    for bytes in rx.iter() {
        if let Err(e) = stream.write_all(&bytes) {
            conn.drop_link(map_stream_error(e));
            return;
        }
    }
    // Sender dropped: orderly teardown.
}

fn reader_loop(conn: Arc<Connection>, mut stream: TcpStream) {
    let mut frames = FrameReader::new();
    let mut buf = [0u8; READ_BUF_LEN];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => {
                conn.drop_link(ConnectionError::Reset);
                return;
            }
            Ok(n) => {
                frames.push(&buf[..n]);
                loop {
                    match frames.next_frame() {
                        Ok(Some(msg)) => conn.route_inbound(msg),
                        Ok(None) => break,
                        Err(e) => {
                            // Framing violation is fatal to the connection.
                            conn.drop_link(e);
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                conn.drop_link(map_stream_error(e));
                return;
            }
        }
    }
}

fn map_stream_error(e: std::io::Error) -> ConnectionError {
    match e.kind() {
        std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::BrokenPipe => {
            ConnectionError::Reset
        }
        _ => ConnectionError::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use serde_json::json;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;

    struct TestPeer {
        listener: TcpListener,
        addr: String,
    }

    impl TestPeer {
        fn bind() -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
            let addr = listener.local_addr().unwrap().to_string();
            Self { listener, addr }
        }

        fn accept(&self) -> TcpStream {
            self.listener.accept().expect("accept").0
        }
    }

    fn connected_pair() -> (Arc<Connection>, Receiver<ConnEvent>, TcpStream) {
        let peer = TestPeer::bind();
        let (tx, rx) = unbounded();
        let conn = Connection::new(tx);
        let addr = peer.addr.clone();
        let accepted = thread::spawn(move || peer.accept());
        conn.connect(&addr).expect("connect");
        let remote = accepted.join().unwrap();
        assert!(matches!(rx.recv().unwrap(), ConnEvent::Connected));
        (conn, rx, remote)
    }

    fn read_request(remote: &mut BufReader<TcpStream>) -> (u64, String, Value) {
        let mut line = String::new();
        remote.read_line(&mut line).expect("read request");
        match serde_json::from_str::<Message>(line.trim_end()).expect("parse request") {
            Message::Request { id, method, params } => (id, method, params),
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn connect_refused_returns_to_disconnected() {
        // Bind then drop so the port refuses.
        let addr = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().to_string()
        };
        let (tx, _rx) = unbounded();
        let conn = Connection::new(tx);
        let err = conn.connect(&addr).unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::Refused(_) | ConnectionError::Io(_)
        ));
        assert_eq!(conn.state(), ConnState::Disconnected);
    }

    #[test]
    fn reconnect_reaps_previous_io_threads() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (tx, rx) = unbounded();
        let conn = Connection::new(tx);

        conn.connect(&addr).expect("first connect");
        let (remote, _) = listener.accept().expect("accept");
        assert!(matches!(rx.recv().unwrap(), ConnEvent::Connected));

        // Remote close ends the first link's threads.
        drop(remote);
        assert!(matches!(rx.recv().unwrap(), ConnEvent::Disconnected(_)));

        conn.connect(&addr).expect("second connect");
        let _remote = listener.accept().expect("accept again");
        assert!(matches!(rx.recv().unwrap(), ConnEvent::Connected));

        // Only the live link's writer and reader are tracked.
        assert_eq!(
            conn.io_threads.lock().unwrap_or_else(|e| e.into_inner()).len(),
            2
        );
        conn.close(RequestError::Shutdown);
    }

    #[test]
    fn send_while_disconnected_is_not_connected_error() {
        let (tx, _rx) = unbounded();
        let conn = Connection::new(tx);
        let err = conn
            .send(&Message::event(EventKind::SceneSwitched, json!({})))
            .unwrap_err();
        assert!(matches!(err, ConnectionError::NotConnected));
    }

    #[test]
    fn answered_request_completes_with_result() {
        let (conn, _rx, remote) = connected_pair();
        let mut reader = BufReader::new(remote.try_clone().unwrap());

        let responder = thread::spawn(move || {
            let (id, method, params) = read_request(&mut reader);
            assert_eq!(method, "switch_scene");
            assert_eq!(params, json!({"name": "Intro"}));
            let response = encode(&Message::response_ok(id, json!({"ok": true})));
            (&remote).write_all(&response).unwrap();
        });

        let pending = conn
            .request("switch_scene", json!({"name": "Intro"}))
            .expect("request");
        let outcome = pending.wait(Duration::from_secs(2));
        assert_eq!(outcome, Ok(ResponseOutcome::Result(json!({"ok": true}))));
        assert_eq!(conn.pending_count(), 0);
        responder.join().unwrap();
    }

    #[test]
    fn error_response_completes_with_error_body() {
        let (conn, _rx, remote) = connected_pair();
        let mut reader = BufReader::new(remote.try_clone().unwrap());

        let responder = thread::spawn(move || {
            let (id, _, _) = read_request(&mut reader);
            let body = ErrorBody::new("not_found", "scene not found: X");
            (&remote)
                .write_all(&encode(&Message::response_err(id, body)))
                .unwrap();
        });

        let pending = conn.request("switch_scene", json!({"name": "X"})).unwrap();
        match pending.wait(Duration::from_secs(2)) {
            Ok(ResponseOutcome::Error(body)) => assert_eq!(body.code, "not_found"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        responder.join().unwrap();
    }

    #[test]
    fn unanswered_request_times_out_exactly_once() {
        let (conn, rx, remote) = connected_pair();
        let mut reader = BufReader::new(remote.try_clone().unwrap());

        let pending = conn.request("get_status", json!({})).unwrap();
        let (id, _, _) = read_request(&mut reader);

        let outcome = pending.wait(Duration::from_millis(50));
        assert_eq!(outcome, Err(RequestError::Timeout));
        assert_eq!(conn.pending_count(), 0);

        // A late response must not tear the connection down.
        (&remote)
            .write_all(&encode(&Message::response_ok(id, json!({}))))
            .unwrap();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(conn.state(), ConnState::Connected);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn inbound_request_surfaces_as_conn_event() {
        let (conn, rx, remote) = connected_pair();
        let request = Message::request(5, "switch_scene", json!({"name": "Main"}));
        (&remote).write_all(&encode(&request)).unwrap();

        match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
            ConnEvent::Inbound(msg) => assert_eq!(msg, request),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(conn.state(), ConnState::Connected);
    }

    #[test]
    fn malformed_frame_kills_the_connection() {
        let (conn, rx, remote) = connected_pair();
        let pending = conn.request("get_status", json!({})).unwrap();

        (&remote).write_all(b"this is not json\n").unwrap();

        match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
            ConnEvent::Disconnected(ConnectionError::MalformedFrame(_)) => {}
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(
            pending.wait(Duration::from_secs(1)),
            Err(RequestError::ConnectionLost)
        );
        assert_eq!(conn.state(), ConnState::Disconnected);
    }

    #[test]
    fn remote_close_disconnects_and_fails_pending() {
        let (conn, rx, remote) = connected_pair();
        let pending = conn.request("get_status", json!({})).unwrap();

        drop(remote);

        match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
            ConnEvent::Disconnected(_) => {}
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(
            pending.wait(Duration::from_secs(1)),
            Err(RequestError::ConnectionLost)
        );
        assert_eq!(conn.state(), ConnState::Disconnected);
    }

    #[test]
    fn close_completes_pending_with_shutdown_and_is_silent() {
        let (conn, rx, _remote) = connected_pair();
        let first = conn.request("get_status", json!({})).unwrap();
        let second = conn.request("get_scenes", json!({})).unwrap();
        assert_eq!(conn.pending_count(), 2);

        conn.close(RequestError::Shutdown);

        assert_eq!(
            first.wait(Duration::from_secs(1)),
            Err(RequestError::Shutdown)
        );
        assert_eq!(
            second.wait(Duration::from_secs(1)),
            Err(RequestError::Shutdown)
        );
        assert_eq!(conn.state(), ConnState::Disconnected);
        assert_eq!(conn.pending_count(), 0);
        // Operator close emits no Disconnected event.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn sends_drain_in_fifo_order() {
        let (conn, _rx, remote) = connected_pair();
        let mut reader = BufReader::new(remote);

        for i in 0..10 {
            conn.send(&Message::event(
                EventKind::SceneSwitched,
                json!({ "seq": i }),
            ))
            .unwrap();
        }

        for i in 0..10 {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let msg: Message = serde_json::from_str(line.trim_end()).unwrap();
            match msg {
                Message::Event { payload, .. } => assert_eq!(payload, json!({ "seq": i })),
                other => panic!("unexpected message: {other:?}"),
            }
        }
    }

    #[test]
    fn correlation_ids_increase_monotonically() {
        let (conn, _rx, remote) = connected_pair();
        let mut reader = BufReader::new(remote);

        let a = conn.request("get_status", json!({})).unwrap();
        let b = conn.request("get_status", json!({})).unwrap();
        assert!(b.id() > a.id());

        let (first, _, _) = read_request(&mut reader);
        let (second, _, _) = read_request(&mut reader);
        assert_eq!(first, a.id());
        assert_eq!(second, b.id());
    }
}

//! Request handle passed from the I/O thread to a worker and back.

use std::fmt;
use std::mem;
use std::net::SocketAddr;

use tokio::sync::oneshot;
use tracing::{debug, warn, Span};
use uuid::Uuid;

use super::event::{EventLoopHandle, OneShotEvent};
use super::status::HttpStatus;
use crate::shutdown::InFlightGuard;
use crate::telemetry::{self, RequestSpan};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestMethod {
    Get,
    Post,
    Head,
    Put,
    Unknown,
}

impl RequestMethod {
    pub fn parse(method: &str) -> Self {
        match method {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "HEAD" => Self::Head,
            "PUT" => Self::Put,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Head => "HEAD",
            Self::Put => "PUT",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reply as handed back to the network layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: HttpStatus,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// Transmits a reply. Implemented by the network layer; always invoked on
/// the I/O thread, exactly once per request.
pub trait ReplySink: Send + 'static {
    fn send_reply(self: Box<Self>, reply: Reply);
}

impl ReplySink for oneshot::Sender<Reply> {
    fn send_reply(self: Box<Self>, reply: Reply) {
        let _ = (*self).send(reply);
    }
}

/// A parsed request as delivered by the network layer.
pub struct IncomingRequest {
    pub method: RequestMethod,
    pub uri: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub peer: Option<SocketAddr>,
    pub sink: Box<dyn ReplySink>,
}

impl IncomingRequest {
    pub fn new(method: &str, uri: impl Into<String>, sink: impl ReplySink) -> Self {
        Self {
            method: RequestMethod::parse(method),
            uri: uri.into(),
            headers: Vec::new(),
            body: Vec::new(),
            peer: None,
            sink: Box::new(sink),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }
}

impl fmt::Debug for IncomingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingRequest")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("peer", &self.peer)
            .field("body_len", &self.body.len())
            .finish_non_exhaustive()
    }
}

/// One in-flight request.
///
/// Owned by exactly one thread at a time: created on the I/O thread, moved
/// into a work item, then consumed by [`write_reply`](Self::write_reply),
/// which posts the transmission back to the I/O thread. A handle dropped
/// without a reply sends `500 Unhandled request`.
pub struct HttpRequest {
    id: Uuid,
    method: RequestMethod,
    uri: String,
    peer: Option<SocketAddr>,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    reply_headers: Vec<(String, String)>,
    sink: Option<Box<dyn ReplySink>>,
    event_loop: EventLoopHandle,
    span: Span,
    in_flight: Option<InFlightGuard>,
}

impl HttpRequest {
    pub fn new(incoming: IncomingRequest, event_loop: EventLoopHandle) -> Self {
        let id = Uuid::new_v4();
        let span = RequestSpan::new(&id, incoming.method.as_str(), &incoming.uri);
        Self {
            id,
            method: incoming.method,
            uri: incoming.uri,
            peer: incoming.peer,
            headers: incoming.headers,
            body: incoming.body,
            reply_headers: Vec::new(),
            sink: Some(incoming.sink),
            event_loop,
            span,
            in_flight: None,
        }
    }

    /// Keep `guard` alive until the reply has been transmitted.
    pub(crate) fn track(&mut self, guard: InFlightGuard) {
        self.in_flight = Some(guard);
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Take the request body. Later calls return an empty buffer.
    pub fn read_body(&mut self) -> Vec<u8> {
        mem::take(&mut self.body)
    }

    /// Case-insensitive request header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Add a header to the reply.
    pub fn write_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.reply_headers.push((name.into(), value.into()));
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn method(&self) -> RequestMethod {
        self.method
    }

    /// Stage the reply and hand its transmission to the I/O thread.
    ///
    /// May be called from any thread. Consumes the handle.
    pub fn write_reply(mut self, status: HttpStatus, body: impl Into<Vec<u8>>) {
        self.send(status, body.into());
    }

    fn send(&mut self, status: HttpStatus, body: Vec<u8>) {
        let Some(sink) = self.sink.take() else {
            return;
        };
        self.span.record("status", status.code());

        let staged = StagedReply {
            sink: Some(sink),
            reply: Some(Reply {
                status,
                headers: mem::take(&mut self.reply_headers),
                body,
            }),
            _in_flight: self.in_flight.take(),
        };
        let event = OneShotEvent::new(self.event_loop.clone(), move || {
            let mut staged = staged;
            staged.transmit();
        });

        // A refused event drops the staged reply here, which transmits it.
        if let Err(e) = event.trigger(None) {
            warn!(
                request_id = %self.id,
                uri = %self.uri,
                error = %e,
                "I/O thread unavailable, reply sent from the calling thread"
            );
        }
    }
}

/// A reply waiting for the I/O thread.
///
/// If the event carrying it is dropped without running (loop stopped or
/// broken), the reply is transmitted from the dropping thread instead, so
/// every request still gets exactly one reply.
struct StagedReply {
    sink: Option<Box<dyn ReplySink>>,
    reply: Option<Reply>,
    _in_flight: Option<InFlightGuard>,
}

impl StagedReply {
    fn transmit(&mut self) {
        if let (Some(sink), Some(reply)) = (self.sink.take(), self.reply.take()) {
            telemetry::record_reply(reply.status.code());
            sink.send_reply(reply);
        }
    }
}

impl Drop for StagedReply {
    fn drop(&mut self) {
        if self.sink.is_some() {
            debug!("transmitting reply outside the event loop");
            self.transmit();
        }
    }
}

impl Drop for HttpRequest {
    fn drop(&mut self) {
        if self.sink.is_none() {
            return;
        }
        warn!(request_id = %self.id, uri = %self.uri, "Unhandled request");
        self.write_header("Connection", "close");
        self.send(HttpStatus::InternalServerError, b"Unhandled request".to_vec());
    }
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use crate::http::event::{EventLoop, DEFAULT_EXIT_GRACE};

    struct ThreadRecordingSink(mpsc::Sender<(Reply, Option<String>)>);

    impl ReplySink for ThreadRecordingSink {
        fn send_reply(self: Box<Self>, reply: Reply) {
            let name = thread::current().name().map(str::to_string);
            let _ = self.0.send((reply, name));
        }
    }

    fn request(
        uri: &str,
        event_loop: &EventLoop,
    ) -> (HttpRequest, mpsc::Receiver<(Reply, Option<String>)>) {
        let (tx, rx) = mpsc::channel();
        let incoming = IncomingRequest::new("POST", uri, ThreadRecordingSink(tx))
            .with_header("Content-Type", "application/json")
            .with_body(b"{\"method\":\"ping\"}".to_vec());
        (HttpRequest::new(incoming, event_loop.handle()), rx)
    }

    #[test]
    fn method_names() {
        assert_eq!(RequestMethod::parse("GET"), RequestMethod::Get);
        assert_eq!(RequestMethod::parse("DELETE"), RequestMethod::Unknown);
        assert_eq!(RequestMethod::Unknown.as_str(), "unknown");
        assert_eq!(RequestMethod::Put.to_string(), "PUT");
    }

    #[test]
    fn read_body_drains_the_buffer() {
        let event_loop = EventLoop::spawn("test-http-io", DEFAULT_EXIT_GRACE).unwrap();
        let (mut req, _rx) = request("/", &event_loop);

        assert_eq!(req.header("content-type"), Some("application/json"));
        assert_eq!(req.header("X-Missing"), None);
        assert_eq!(req.read_body(), b"{\"method\":\"ping\"}".to_vec());
        assert!(req.read_body().is_empty());
        req.write_reply(HttpStatus::Ok, Vec::new());
    }

    #[test]
    fn reply_is_transmitted_on_the_io_thread() {
        let event_loop = EventLoop::spawn("test-http-io", DEFAULT_EXIT_GRACE).unwrap();
        let (mut req, rx) = request("/wallet/", &event_loop);

        thread::spawn(move || {
            req.write_header("Content-Type", "text/plain");
            req.write_reply(HttpStatus::Ok, "pong");
        })
        .join()
        .unwrap();

        let (reply, thread_name) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(reply.status, HttpStatus::Ok);
        assert_eq!(reply.body, b"pong".to_vec());
        assert_eq!(reply.header("content-type"), Some("text/plain"));
        assert_eq!(thread_name.as_deref(), Some("test-http-io"));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn dropped_handle_sends_exactly_one_internal_error() {
        let event_loop = EventLoop::spawn("test-http-io", DEFAULT_EXIT_GRACE).unwrap();
        let (req, rx) = request("/", &event_loop);
        drop(req);

        let (reply, _) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(reply.status, HttpStatus::InternalServerError);
        assert_eq!(reply.body, b"Unhandled request".to_vec());
        assert_eq!(reply.header("Connection"), Some("close"));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn handle_dropped_during_unwind_still_replies() {
        let event_loop = EventLoop::spawn("test-http-io", DEFAULT_EXIT_GRACE).unwrap();
        let (req, rx) = request("/", &event_loop);

        let result = thread::spawn(move || {
            let _req = req;
            panic!("handler bug");
        })
        .join();
        assert!(result.is_err());

        let (reply, _) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(reply.status, HttpStatus::InternalServerError);
    }

    #[test]
    fn oneshot_sender_is_a_reply_sink() {
        let event_loop = EventLoop::spawn("test-http-io", DEFAULT_EXIT_GRACE).unwrap();
        let (tx, rx) = oneshot::channel();
        let req = HttpRequest::new(IncomingRequest::new("GET", "/health", tx), event_loop.handle());
        assert_eq!(req.method(), RequestMethod::Get);
        req.write_reply(HttpStatus::NotFound, "");

        let reply = rx.blocking_recv().unwrap();
        assert_eq!(reply.status, HttpStatus::NotFound);
    }

    #[test]
    fn reply_after_event_loop_stops_is_still_delivered() {
        let mut event_loop = EventLoop::spawn("test-http-io", DEFAULT_EXIT_GRACE).unwrap();
        let (req, rx) = request("/", &event_loop);
        event_loop.stop().unwrap();

        req.write_reply(HttpStatus::Ok, "late");

        let (reply, _) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(reply.status, HttpStatus::Ok);
        assert_eq!(reply.body, b"late".to_vec());
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn handle_dropped_after_event_loop_stops_still_replies() {
        let mut event_loop = EventLoop::spawn("test-http-io", DEFAULT_EXIT_GRACE).unwrap();
        let (req, rx) = request("/", &event_loop);
        event_loop.stop().unwrap();
        drop(req);

        let (reply, _) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(reply.status, HttpStatus::InternalServerError);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn in_flight_guard_released_after_late_reply() {
        let shutdown = crate::shutdown::ShutdownCoordinator::new();
        let mut event_loop = EventLoop::spawn("test-http-io", DEFAULT_EXIT_GRACE).unwrap();
        let (mut req, rx) = request("/", &event_loop);
        req.track(shutdown.track().unwrap());
        event_loop.stop().unwrap();

        req.write_reply(HttpStatus::Ok, "");
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(shutdown.in_flight_count(), 0);
    }
}

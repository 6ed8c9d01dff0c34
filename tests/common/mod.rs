//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use node_dispatch::http::{IncomingRequest, Reply, ReplySink};

/// A transmitted reply plus the name of the thread that transmitted it.
#[derive(Debug)]
pub struct Recorded {
    pub reply: Reply,
    pub thread: Option<String>,
}

impl Recorded {
    pub fn code(&self) -> u16 {
        self.reply.status.code()
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.reply.body).into_owned()
    }
}

/// Reply sink that forwards every transmission to a channel.
pub struct RecordingSink {
    tx: Sender<Recorded>,
}

impl ReplySink for RecordingSink {
    fn send_reply(self: Box<Self>, reply: Reply) {
        let thread = thread::current().name().map(str::to_string);
        let _ = self.tx.send(Recorded { reply, thread });
    }
}

pub fn recording_sink() -> (RecordingSink, Receiver<Recorded>) {
    let (tx, rx) = mpsc::channel();
    (RecordingSink { tx }, rx)
}

pub fn loopback_peer() -> SocketAddr {
    "127.0.0.1:51234".parse().unwrap()
}

/// A request from loopback with a recording sink.
pub fn request(method: &str, uri: &str) -> (IncomingRequest, Receiver<Recorded>) {
    let (sink, rx) = recording_sink();
    let incoming = IncomingRequest::new(method, uri, sink).with_peer(loopback_peer());
    (incoming, rx)
}

pub fn expect_reply(rx: &Receiver<Recorded>) -> Recorded {
    rx.recv_timeout(Duration::from_secs(5))
        .expect("no reply transmitted")
}

/// Asserts nothing else arrives on `rx` for a short while.
pub fn expect_no_more(rx: &Receiver<Recorded>) {
    assert!(
        rx.recv_timeout(Duration::from_millis(100)).is_err(),
        "a second reply was transmitted"
    );
}

pub fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("condition not reached in time");
}

#![allow(dead_code)]
//! Shared helpers for relay-link integration tests.

use futures_util::StreamExt;
use relay_link::{
    memory_pair, Connector, LinkError, MemoryPeer, MemorySocket, Result, StreamEvent,
    StreamEventKind, StreamReader,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
        .is_test(true)
        .try_init();
}

/// What the next connection attempt does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Open,
    Refuse,
    /// Never resolves; counted in [`Peers::abandoned`] once dropped.
    Hang,
}

struct AbandonGuard(Arc<AtomicUsize>);

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Connector that follows a fixed script of outcomes. Once the script is
/// exhausted every attempt is refused. The server end of each opened
/// socket is handed out through [`Peers`].
pub struct ScriptedConnector {
    script: Mutex<VecDeque<Outcome>>,
    peers: mpsc::UnboundedSender<MemoryPeer>,
    calls: Arc<AtomicUsize>,
    abandoned: Arc<AtomicUsize>,
}

pub struct Peers {
    rx: mpsc::UnboundedReceiver<MemoryPeer>,
    calls: Arc<AtomicUsize>,
    abandoned: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    pub fn new(script: impl IntoIterator<Item = Outcome>) -> (Self, Peers) {
        let (tx, rx) = mpsc::unbounded_channel();
        let calls = Arc::new(AtomicUsize::new(0));
        let abandoned = Arc::new(AtomicUsize::new(0));
        (
            Self {
                script: Mutex::new(script.into_iter().collect()),
                peers: tx,
                calls: calls.clone(),
                abandoned: abandoned.clone(),
            },
            Peers {
                rx,
                calls,
                abandoned,
            },
        )
    }
}

impl Connector for ScriptedConnector {
    type Socket = MemorySocket;

    async fn connect(&self, _url: &str, _protocol: Option<&str>) -> Result<MemorySocket> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self.script.lock().unwrap().pop_front().unwrap_or(Outcome::Refuse);
        match outcome {
            Outcome::Open => {
                let (socket, peer) = memory_pair();
                let _ = self.peers.send(peer);
                Ok(socket)
            },
            Outcome::Refuse => Err(LinkError::WebSocketError("connection refused".to_string())),
            Outcome::Hang => {
                let _guard = AbandonGuard(self.abandoned.clone());
                std::future::pending().await
            },
        }
    }
}

impl Peers {
    /// Server end of the next opened socket.
    pub async fn next(&mut self) -> MemoryPeer {
        tokio::time::timeout(EVENT_TIMEOUT, self.rx.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("connector dropped")
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Hanging attempts whose future was dropped.
    pub fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }
}

/// Poll `condition` until it holds or [`EVENT_TIMEOUT`] passes.
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    true
}

pub async fn next_event<R, S>(events: &mut StreamReader<StreamEvent<R, S>>) -> StreamEvent<R, S> {
    tokio::time::timeout(EVENT_TIMEOUT, events.next())
        .await
        .expect("timed out waiting for an event")
        .expect("event stream ended")
}

pub async fn next_kind<R, S>(events: &mut StreamReader<StreamEvent<R, S>>) -> StreamEventKind {
    next_event(events).await.kind()
}

/// Read `n` events and return their kinds.
pub async fn kinds<R, S>(
    events: &mut StreamReader<StreamEvent<R, S>>,
    n: usize,
) -> Vec<StreamEventKind> {
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(next_kind(events).await);
    }
    out
}

//! In-memory transport for testing and single-process embedding
//!
//! `MemoryTransport::new()` returns the client-side transport together with
//! a `MemoryServer` that accepts one `MemoryPeer` per opened link. Dropping
//! a peer closes its link from the server side.

use super::{FrameSink, FrameStream, Link, Transport};
use crate::command::ClientCommand;
use crate::error::{Result, SessionError};
use crate::types::StreamEvent;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// Client side of an in-memory link factory
pub struct MemoryTransport {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    fail_next: AtomicUsize,
    stall_next: AtomicUsize,
    opened: AtomicUsize,
}

/// Server side: yields a peer for every link the client opens
pub struct MemoryServer {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryTransport {
    /// Create a transport and its paired server
    pub fn new() -> (Self, MemoryServer) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        (
            Self {
                accept_tx,
                fail_next: AtomicUsize::new(0),
                stall_next: AtomicUsize::new(0),
                opened: AtomicUsize::new(0),
            },
            MemoryServer { accept_rx },
        )
    }

    /// Refuse the next `n` open attempts
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Never complete the next `n` open attempts
    pub fn stall_next(&self, n: usize) {
        self.stall_next.store(n, Ordering::SeqCst);
    }

    /// Number of links successfully opened so far
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self) -> Result<Link> {
        if take_one(&self.stall_next) {
            std::future::pending::<()>().await;
        }
        if take_one(&self.fail_next) {
            return Err(SessionError::Connection("memory: connection refused".into()));
        }

        let (to_server_tx, to_server_rx) = mpsc::unbounded_channel();
        let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();

        let peer = MemoryPeer {
            incoming: to_server_rx,
            outgoing: to_client_tx,
        };
        self.accept_tx
            .send(peer)
            .map_err(|_| SessionError::Connection("memory: server dropped".into()))?;

        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Link::new(
            MemorySink {
                tx: Some(to_server_tx),
            },
            MemoryStream { rx: to_client_rx },
        ))
    }

    fn endpoint(&self) -> &str {
        "memory://local"
    }

    fn name(&self) -> &str {
        "memory"
    }
}

struct MemorySink {
    tx: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: String) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| SessionError::NotConnected("memory: link closed".into()))?;
        tx.send(frame)
            .map_err(|_| SessionError::Connection("memory: peer closed".into()))
    }

    async fn close(&mut self) -> Result<()> {
        self.tx.take();
        Ok(())
    }
}

struct MemoryStream {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl FrameStream for MemoryStream {
    async fn next(&mut self) -> Result<Option<String>> {
        Ok(self.rx.recv().await)
    }
}

impl MemoryServer {
    /// Wait for the client to open the next link
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }
}

/// Server end of one in-memory link
pub struct MemoryPeer {
    incoming: mpsc::UnboundedReceiver<String>,
    outgoing: mpsc::UnboundedSender<String>,
}

impl MemoryPeer {
    /// Push a raw frame to the client; false if the client side is gone
    pub fn send(&self, frame: impl Into<String>) -> bool {
        self.outgoing.send(frame.into()).is_ok()
    }

    /// Push an encoded stream event to the client
    pub fn send_event(&self, event: &StreamEvent) -> bool {
        match serde_json::to_string(event) {
            Ok(frame) => self.send(frame),
            Err(_) => false,
        }
    }

    /// Next raw frame written by the client; `None` once it closed
    pub async fn recv(&mut self) -> Option<String> {
        self.incoming.recv().await
    }

    /// Next decoded command written by the client
    pub async fn recv_command(&mut self) -> Option<ClientCommand> {
        let frame = self.recv().await?;
        serde_json::from_str(&frame).ok()
    }
}

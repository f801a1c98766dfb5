//! Transport trait: the duplex link abstraction under the connection
//!
//! A `Transport` knows how to open one physical link (WebSocket, in-memory,
//! etc.). The `Connection` layers connect timeouts, reconnect backoff and
//! frame dispatch on top of whichever transport it is given.

use crate::error::Result;
use async_trait::async_trait;

pub mod memory;
pub mod websocket;

/// Opens duplex links to the backend
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new link; the connection applies its own timeout around this
    async fn open(&self) -> Result<Link>;

    /// Endpoint description used in logs and errors
    fn endpoint(&self) -> &str;

    /// Transport name (e.g., "websocket", "memory")
    fn name(&self) -> &str;
}

/// Writing half of a link
#[async_trait]
pub trait FrameSink: Send {
    /// Send one text frame
    async fn send(&mut self, frame: String) -> Result<()>;

    /// Close the link deliberately
    async fn close(&mut self) -> Result<()>;
}

/// Reading half of a link
#[async_trait]
pub trait FrameStream: Send {
    /// Receive the next text frame; `Ok(None)` when the peer closed
    async fn next(&mut self) -> Result<Option<String>>;
}

/// An open duplex link
pub struct Link {
    pub sink: Box<dyn FrameSink>,
    pub stream: Box<dyn FrameStream>,
}

impl Link {
    pub fn new(sink: impl FrameSink + 'static, stream: impl FrameStream + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            stream: Box::new(stream),
        }
    }
}

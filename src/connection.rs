//! Managed transport connection with reconnect backoff
//!
//! Owns the single duplex link to the backend. Inbound frames are handed
//! synchronously to a frame handler from the reader task; nothing awaits
//! inside a dispatch. On an unexpected close the connection reconnects
//! after `base_delay * attempt`, up to a fixed number of attempts.

use crate::error::{Result, SessionError};
use crate::transport::{FrameSink, FrameStream, Link, Transport};
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// Receives every raw inbound frame
pub type FrameHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Invoked after a successful automatic reconnect
pub type ReconnectHook = Arc<dyn Fn() + Send + Sync>;

/// Observable connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting for or performing reconnect attempt `attempt`
    Reconnecting { attempt: u32 },
    /// All reconnect attempts failed
    Exhausted,
}

/// Connection timing and retry settings
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Bound on waiting for the link to open
    pub connect_timeout: Duration,

    /// Reconnect delay unit; attempt `n` waits `n * reconnect_base_delay`
    pub reconnect_base_delay: Duration,

    /// Attempts before giving up
    pub max_reconnect_attempts: u32,
}

impl ConnectionConfig {
    /// Delay before reconnect attempt `attempt`, saturating at `Duration::MAX`
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        self.reconnect_base_delay
            .checked_mul(attempt)
            .unwrap_or(Duration::MAX)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            reconnect_base_delay: Duration::from_secs(1),
            max_reconnect_attempts: 5,
        }
    }
}

/// Managed duplex connection with automatic reconnect
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    config: ConnectionConfig,
    handler: FrameHandler,

    /// Writing half of the current link
    writer: Mutex<Option<Box<dyn FrameSink>>>,

    /// Serializes connect attempts so concurrent callers share one
    connect_gate: Mutex<()>,

    status: watch::Sender<ConnectionStatus>,

    /// Cleared by a deliberate disconnect
    auto_reconnect: AtomicBool,

    /// Set when a link was lost unexpectedly; the next open is a reconnect
    needs_reset: AtomicBool,

    /// Identifies the current link; readers of older links are ignored
    generation: AtomicU64,

    reader: StdMutex<Option<JoinHandle<()>>>,
    reconnector: StdMutex<Option<JoinHandle<()>>>,
    on_reconnected: StdMutex<Option<ReconnectHook>>,
}

impl Connection {
    /// Create a disconnected connection over a transport
    pub fn new(transport: Arc<dyn Transport>, config: ConnectionConfig, handler: FrameHandler) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                handler,
                writer: Mutex::new(None),
                connect_gate: Mutex::new(()),
                status,
                auto_reconnect: AtomicBool::new(true),
                needs_reset: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                reader: StdMutex::new(None),
                reconnector: StdMutex::new(None),
                on_reconnected: StdMutex::new(None),
            }),
        }
    }

    /// Open the link, or join the attempt already in flight
    ///
    /// Returns immediately when already connected.
    pub async fn connect(&self) -> Result<()> {
        let _gate = self.inner.connect_gate.lock().await;
        if self.is_connected() {
            return Ok(());
        }
        self.inner.auto_reconnect.store(true, Ordering::SeqCst);
        self.inner.status.send_replace(ConnectionStatus::Connecting);

        match Inner::establish(&self.inner).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.inner.status.send_replace(ConnectionStatus::Disconnected);
                Err(e)
            }
        }
    }

    /// Close deliberately and disable auto reconnect
    pub async fn disconnect(&self) {
        let _gate = self.inner.connect_gate.lock().await;
        self.inner.auto_reconnect.store(false, Ordering::SeqCst);
        self.inner.needs_reset.store(false, Ordering::SeqCst);
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        abort_task(&self.inner.reconnector);
        abort_task(&self.inner.reader);

        if let Some(mut sink) = self.inner.writer.lock().await.take() {
            if let Err(e) = sink.close().await {
                tracing::debug!(error = %e, "Error closing link");
            }
        }

        self.inner.status.send_replace(ConnectionStatus::Disconnected);
        tracing::info!(endpoint = %self.inner.transport.endpoint(), "Disconnected");
    }

    /// Send one text frame, connecting first if needed
    pub async fn send_frame(&self, frame: String) -> Result<()> {
        self.connect().await?;
        let mut writer = self.inner.writer.lock().await;
        let sink = writer.as_mut().ok_or_else(|| {
            SessionError::NotConnected(self.inner.transport.endpoint().to_string())
        })?;
        sink.send(frame).await
    }

    /// Install the hook invoked after each automatic reconnect
    pub fn set_on_reconnected(&self, hook: ReconnectHook) {
        *lock(&self.inner.on_reconnected) = Some(hook);
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.borrow()
    }

    /// Watch status changes
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn endpoint(&self) -> &str {
        self.inner.transport.endpoint()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.inner.auto_reconnect.store(false, Ordering::SeqCst);
        abort_task(&self.inner.reconnector);
        abort_task(&self.inner.reader);
    }
}

impl Inner {
    /// Open a link and start its reader; caller holds the connect gate
    async fn establish(inner: &Arc<Inner>) -> Result<()> {
        let timeout = inner.config.connect_timeout;
        let Link { sink, stream } = tokio::time::timeout(timeout, inner.transport.open())
            .await
            .map_err(|_| SessionError::ConnectionTimeout {
                url: inner.transport.endpoint().to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })??;

        *inner.writer.lock().await = Some(sink);
        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        inner.status.send_replace(ConnectionStatus::Connected);

        tracing::info!(
            endpoint = %inner.transport.endpoint(),
            transport = inner.transport.name(),
            generation,
            "Connected"
        );

        // Stale callbacks must be discarded before the new link delivers anything.
        if inner.needs_reset.swap(false, Ordering::SeqCst) {
            let hook = lock(&inner.on_reconnected).clone();
            if let Some(hook) = hook {
                hook();
            }
        }

        let handle = tokio::spawn(Inner::read_loop(Arc::clone(inner), stream, generation));
        if let Some(old) = lock(&inner.reader).replace(handle) {
            old.abort();
        }
        Ok(())
    }

    async fn read_loop(inner: Arc<Inner>, mut stream: Box<dyn FrameStream>, generation: u64) {
        let reason = loop {
            match stream.next().await {
                Ok(Some(frame)) => (inner.handler)(&frame),
                Ok(None) => break "closed by peer".to_string(),
                Err(e) => break e.to_string(),
            }
        };
        Inner::on_link_lost(&inner, generation, reason).await;
    }

    async fn on_link_lost(inner: &Arc<Inner>, generation: u64, reason: String) {
        if inner.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        inner.writer.lock().await.take();

        if !inner.auto_reconnect.load(Ordering::SeqCst) {
            inner.status.send_replace(ConnectionStatus::Disconnected);
            return;
        }

        tracing::warn!(
            endpoint = %inner.transport.endpoint(),
            reason = %reason,
            "Connection lost, scheduling reconnect"
        );
        inner.needs_reset.store(true, Ordering::SeqCst);
        inner.status.send_replace(ConnectionStatus::Reconnecting { attempt: 1 });

        let handle = tokio::spawn(Inner::reconnect_loop(Arc::clone(inner)));
        if let Some(old) = lock(&inner.reconnector).replace(handle) {
            old.abort();
        }
    }

    /// Boxed so the spawn cycle (establish → reader → reconnect → establish)
    /// has a nameable future type.
    fn reconnect_loop(inner: Arc<Inner>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let max = inner.config.max_reconnect_attempts;
            for attempt in 1..=max {
                let delay = inner.config.reconnect_delay(attempt);
                inner
                    .status
                    .send_replace(ConnectionStatus::Reconnecting { attempt });
                tracing::info!(attempt, max, delay_ms = delay.as_millis() as u64, "Reconnecting");
                tokio::time::sleep(delay).await;

                let _gate = inner.connect_gate.lock().await;
                if !inner.auto_reconnect.load(Ordering::SeqCst) {
                    return;
                }
                if *inner.status.borrow() == ConnectionStatus::Connected {
                    return;
                }
                match Inner::establish(&inner).await {
                    Ok(()) => {
                        tracing::info!(attempt, "Reconnected");
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(attempt, error = %e, "Reconnect attempt failed");
                    }
                }
            }

            tracing::error!(
                endpoint = %inner.transport.endpoint(),
                attempts = max,
                "Reconnect attempts exhausted"
            );
            inner.status.send_replace(ConnectionStatus::Exhausted);
        })
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn abort_task(slot: &StdMutex<Option<JoinHandle<()>>>) {
    if let Some(handle) = lock(slot).take() {
        handle.abort();
    }
}

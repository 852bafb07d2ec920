//! In-process test double for the WebSocket transport.
//!
//! [`MemoryConnector`] hands out transports backed by tokio channels and
//! keeps a [`MemoryPeer`] for each one, so a test can play the relay: push
//! frames, inspect what the client wrote and observe closes. Handshakes can
//! be held open to observe the `Opening` state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use super::{Connector, FrameSink, FrameSource, Transport, WsMessage};

/// Connector that records every transport it opens.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    inner: Arc<Mutex<MemoryConnectorInner>>,
    /// `true` while handshakes are held pending.
    held: Arc<watch::Sender<bool>>,
}

impl Default for MemoryConnector {
    fn default() -> Self {
        let (held, _) = watch::channel(false);
        Self {
            inner: Arc::default(),
            held: Arc::new(held),
        }
    }
}

#[derive(Debug, Default)]
struct MemoryConnectorInner {
    peers: Vec<MemoryPeer>,
    refuse: bool,
}

impl MemoryConnector {
    /// Create a connector that accepts every handshake.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep every handshake pending until [`release_handshakes`](Self::release_handshakes).
    pub fn hold_handshakes(&self) {
        self.held.send_replace(true);
    }

    /// Let pending and future handshakes complete.
    pub fn release_handshakes(&self) {
        self.held.send_replace(false);
    }

    /// Make subsequent handshakes fail (`true`) or succeed (`false`).
    pub fn set_refuse(&self, refuse: bool) {
        self.lock().refuse = refuse;
    }

    /// Server-side handles of every transport opened so far, oldest first.
    #[must_use]
    pub fn peers(&self) -> Vec<MemoryPeer> {
        self.lock().peers.clone()
    }

    /// Number of transports opened so far.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.lock().peers.len()
    }

    /// Server-side handle of the most recent transport.
    #[must_use]
    pub fn last_peer(&self) -> Option<MemoryPeer> {
        self.lock().peers.last().cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryConnectorInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Transport> {
        let mut gate = self.held.subscribe();
        let released = gate.wait_for(|held| !*held).await.is_ok();
        if !released {
            bail!("memory connector dropped during handshake");
        }

        let mut inner = self.lock();
        if inner.refuse {
            bail!("connection refused: {url}");
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let peer = MemoryPeer {
            url: url.to_string(),
            inbound_tx,
            written: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        };
        inner.peers.push(peer.clone());

        Ok(Transport {
            writer: Box::new(MemorySink {
                written: Arc::clone(&peer.written),
                closed: Arc::clone(&peer.closed),
            }),
            reader: Box::new(MemorySource { rx: inbound_rx }),
        })
    }
}

/// Server-side view of one in-memory transport.
#[derive(Debug, Clone)]
pub struct MemoryPeer {
    url: String,
    inbound_tx: mpsc::UnboundedSender<WsMessage>,
    written: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl MemoryPeer {
    /// URL the client connected to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Deliver a text frame to the client. Returns `false` once the
    /// client side is gone.
    pub fn push_text(&self, text: &str) -> bool {
        self.push(WsMessage::Text(text.to_string()))
    }

    /// Deliver an arbitrary frame to the client.
    pub fn push(&self, message: WsMessage) -> bool {
        self.inbound_tx.send(message).is_ok()
    }

    /// Close the transport from the server side.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.push(WsMessage::Close {
            code,
            reason: reason.to_string(),
        });
    }

    /// Text frames the client has written, in order.
    #[must_use]
    pub fn written(&self) -> Vec<String> {
        self.written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the client closed (or dropped) its write half.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct MemorySink {
    written: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_text(&mut self, text: &str) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            bail!("send on closed memory transport");
        }
        self.written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(text.to_string());
        Ok(())
    }

    async fn send_close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for MemorySink {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct MemorySource {
    rx: mpsc::UnboundedReceiver<WsMessage>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn recv(&mut self) -> Option<Result<WsMessage>> {
        self.rx.recv().await.map(Ok)
    }
}

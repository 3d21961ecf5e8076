//! Transport boundary — where serialized parts leave and enter the core.
//!
//! The core never touches a radio or a socket. Outgoing parts go through a
//! [`PartSink`]; incoming bytes are pushed into an [`Inbox`], either directly
//! or through [`receive_loop`] when the transport lives on a tokio task.

use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::part::Part;
use crate::pipeline::Inbox;
use crate::reassembly::Delivery;
use crate::transmission::TransmissionKey;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("part of {len} bytes exceeds transport capacity {capacity}")]
    Oversized { len: usize, capacity: usize },

    #[error("transport queue is full")]
    Full,

    #[error("transport is closed")]
    Closed,
}

/// The `send(Part)` half of a transport.
pub trait PartSink: Send + Sync {
    /// Largest serialized part, in bytes, the transport can carry.
    fn capacity(&self) -> usize;

    fn send(&self, destination: &str, part: Bytes) -> Result<(), TransportError>;

    /// Refuse the batch if any part exceeds the capacity.
    fn check_capacity(&self, parts: &[Part]) -> Result<(), TransportError> {
        let capacity = self.capacity();
        match parts.iter().find(|p| p.wire_len() > capacity) {
            Some(part) => Err(TransportError::Oversized {
                len: part.wire_len(),
                capacity,
            }),
            None => Ok(()),
        }
    }

    /// Send every part in order. Sizes are checked first, so `Oversized`
    /// means nothing was sent; any other error stops after the parts
    /// already handed over.
    fn send_all(&self, destination: &str, parts: &[Part]) -> Result<usize, TransportError> {
        self.check_capacity(parts)?;
        for part in parts {
            self.send(destination, part.to_bytes())?;
        }
        Ok(parts.len())
    }
}

// ── In-memory ─────────────────────────────────────────────────────────────────

/// Records every `(destination, bytes)` pair it is handed.
#[derive(Debug)]
pub struct MemoryTransport {
    capacity: usize,
    sent: Mutex<Vec<(String, Bytes)>>,
}

impl MemoryTransport {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<(String, Bytes)> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Drain everything sent so far.
    pub fn take(&self) -> Vec<(String, Bytes)> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PartSink for MemoryTransport {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn send(&self, destination: &str, part: Bytes) -> Result<(), TransportError> {
        if part.len() > self.capacity {
            return Err(TransportError::Oversized {
                len: part.len(),
                capacity: self.capacity,
            });
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((destination.to_string(), part));
        Ok(())
    }
}

// ── Channels ──────────────────────────────────────────────────────────────────

/// Forwards serialized parts into a tokio channel without blocking.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    capacity: usize,
    tx: mpsc::Sender<(String, Bytes)>,
}

impl ChannelSink {
    pub fn new(capacity: usize, tx: mpsc::Sender<(String, Bytes)>) -> Self {
        Self { capacity, tx }
    }
}

impl PartSink for ChannelSink {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn send(&self, destination: &str, part: Bytes) -> Result<(), TransportError> {
        self.tx
            .try_send((destination.to_string(), part))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => TransportError::Full,
                mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
            })
    }
}

/// Drain `(sender, part bytes)` pairs into `inbox` until shutdown or until
/// every sender is gone. Keys of completed transmissions go to `completed`.
pub async fn receive_loop(
    inbox: Arc<Inbox>,
    mut parts: mpsc::Receiver<(String, Bytes)>,
    completed: mpsc::Sender<TransmissionKey>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("receive loop shutting down");
                return;
            }
            next = parts.recv() => {
                let Some((sender, bytes)) = next else {
                    tracing::debug!("part channel closed, receive loop exiting");
                    return;
                };
                match inbox.receive(&sender, bytes) {
                    Ok((key, Delivery::Complete { .. })) => {
                        tokio::select! {
                            _ = shutdown.recv() => {
                                tracing::info!(transmission = %key, "receive loop shutting down, completion not reported");
                                return;
                            }
                            sent = completed.send(key.clone()) => {
                                if let Err(e) = sent {
                                    tracing::warn!(transmission = %key, error = %e, "failed to report completed transmission");
                                }
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(sender = %sender, error = %e, "part rejected");
                    }
                }
            }
        }
    }
}

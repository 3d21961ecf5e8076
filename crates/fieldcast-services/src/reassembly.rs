//! Reassembly — concurrent receive-side state for every transmission in flight.
//!
//! Parts for different transmissions proceed independently: the map shard
//! lock is only held long enough to fetch or create a transmission handle.
//! Parts for the same transmission are serialised on that transmission's
//! mutex, so the completeness check always sees a consistent index set.
//! Nothing here blocks waiting for a missing part and nothing runs timers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fieldcast_core::config::ReceiveSettings;
use fieldcast_core::schema::SchemaId;
use fieldcast_core::wire::WireError;
use thiserror::Error;

use crate::part::Part;
use crate::transmission::{Integrity, Transmission, TransmissionKey, TransmissionState};

// ── Outcomes ──────────────────────────────────────────────────────────────────

/// What happened to a delivered part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Stored; the transmission is still collecting.
    Stored { received: u16, total: u16 },
    /// This part completed the transmission. Reported exactly once.
    Complete { payload: Bytes, integrity: Integrity },
    /// Late or duplicate part for a completed transmission. Ignored.
    AlreadyComplete,
    /// Part for an abandoned transmission. Ignored.
    Dropped,
}

/// Protocol errors. The offending part is dropped and the transmission
/// keeps its prior state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReceiveError {
    #[error("malformed part: {0}")]
    Malformed(#[from] WireError),

    #[error("transmission {id}: part declares {got} parts, expected {expected}")]
    TotalConflict { id: u32, expected: u16, got: u16 },

    #[error("transmission {id}: part belongs to schema {got}, expected {expected}")]
    SchemaConflict {
        id: u32,
        expected: SchemaId,
        got: SchemaId,
    },

    #[error("transmission {id}: payload digest {got} differs from {expected}")]
    DigestConflict {
        id: u32,
        expected: String,
        got: String,
    },

    #[error("{limit} transmissions already tracked")]
    WindowFull { limit: usize },
}

/// A reconstructed payload awaiting decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPayload {
    pub schema: SchemaId,
    pub payload: Bytes,
    pub integrity: Integrity,
}

/// Point-in-time view of one transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransmissionStatus {
    pub schema: SchemaId,
    pub state: TransmissionState,
    pub received: u16,
    pub total: u16,
    pub missing: Vec<u16>,
}

/// A collecting transmission with no recent part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalledTransmission {
    pub key: TransmissionKey,
    pub schema: SchemaId,
    pub missing: Vec<u16>,
    pub total: u16,
    pub idle: Duration,
    /// Time since the first part arrived.
    pub age: Duration,
}

// ── Reassembler ───────────────────────────────────────────────────────────────

pub struct Reassembler {
    transmissions: DashMap<TransmissionKey, Arc<Mutex<Transmission>>>,
    /// Slots taken in the window; reserved before a new entry is inserted.
    inflight: AtomicUsize,
    max_inflight: usize,
}

fn lock(handle: &Mutex<Transmission>) -> MutexGuard<'_, Transmission> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Reassembler {
    pub fn new(settings: &ReceiveSettings) -> Self {
        Self::with_limit(settings.max_inflight)
    }

    pub fn with_limit(max_inflight: usize) -> Self {
        Self {
            transmissions: DashMap::new(),
            inflight: AtomicUsize::new(0),
            max_inflight,
        }
    }

    fn handle(&self, key: &TransmissionKey) -> Option<Arc<Mutex<Transmission>>> {
        self.transmissions.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Deliver one part from `sender`.
    pub fn receive(&self, sender: &str, part: Part) -> Result<Delivery, ReceiveError> {
        let key = TransmissionKey::new(sender, part.transmission_id);
        if let Err(e) = part.header().validate() {
            tracing::warn!(transmission = %key, error = %e, "malformed part dropped");
            return Err(e.into());
        }

        let handle = match self.handle(&key) {
            Some(handle) => handle,
            None => match self.transmissions.entry(key.clone()) {
                Entry::Occupied(entry) => Arc::clone(entry.get()),
                Entry::Vacant(slot) => {
                    let reserved = self
                        .inflight
                        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                            (n < self.max_inflight).then_some(n + 1)
                        });
                    if reserved.is_err() {
                        tracing::warn!(transmission = %key, limit = self.max_inflight, "reassembly window full, part dropped");
                        return Err(ReceiveError::WindowFull {
                            limit: self.max_inflight,
                        });
                    }
                    tracing::debug!(
                        transmission = %key,
                        schema = %part.schema,
                        total = part.total,
                        digest = hex::encode(part.digest),
                        "new transmission"
                    );
                    let handle = Arc::new(Mutex::new(Transmission::new(&part)));
                    slot.insert(Arc::clone(&handle));
                    handle
                }
            },
        };

        let index = part.index;
        let delivery = lock(&handle).accept(part);
        match &delivery {
            Ok(Delivery::Stored { received, total }) => {
                tracing::trace!(transmission = %key, index, received, total, "part stored");
            }
            Ok(Delivery::Complete { payload, integrity }) => {
                tracing::info!(
                    transmission = %key,
                    bytes = payload.len(),
                    integrity = ?integrity,
                    "transmission complete"
                );
            }
            Ok(Delivery::AlreadyComplete) => {
                tracing::debug!(transmission = %key, index, "late part for completed transmission");
            }
            Ok(Delivery::Dropped) => {
                tracing::debug!(transmission = %key, index, "part for abandoned transmission dropped");
            }
            Err(e) => {
                tracing::warn!(transmission = %key, index, error = %e, "malformed part dropped");
            }
        }
        delivery
    }

    /// Parse and deliver serialized part bytes.
    pub fn receive_bytes(
        &self,
        sender: &str,
        bytes: Bytes,
    ) -> Result<(TransmissionKey, Delivery), ReceiveError> {
        let part = Part::from_bytes(bytes).map_err(|e| {
            tracing::warn!(sender, error = %e, "unparseable part dropped");
            e
        })?;
        let key = TransmissionKey::new(sender, part.transmission_id);
        let delivery = self.receive(sender, part)?;
        Ok((key, delivery))
    }

    pub fn state(&self, key: &TransmissionKey) -> Option<TransmissionState> {
        self.handle(key).map(|h| lock(&h).state())
    }

    pub fn status(&self, key: &TransmissionKey) -> Option<TransmissionStatus> {
        let handle = self.handle(key)?;
        let t = lock(&handle);
        Some(TransmissionStatus {
            schema: t.schema(),
            state: t.state(),
            received: t.received(),
            total: t.total(),
            missing: t.missing(),
        })
    }

    /// Missing indices of a collecting transmission; `None` if unknown.
    pub fn missing_parts(&self, key: &TransmissionKey) -> Option<Vec<u16>> {
        self.handle(key).map(|h| lock(&h).missing())
    }

    pub fn payload(&self, key: &TransmissionKey) -> Option<CompletedPayload> {
        let handle = self.handle(key)?;
        let t = lock(&handle);
        t.payload().map(|(payload, integrity)| CompletedPayload {
            schema: t.schema(),
            payload,
            integrity,
        })
    }

    /// Give up on a collecting transmission. The id stays known so late
    /// parts are dropped instead of starting a new transmission.
    pub fn abandon(&self, key: &TransmissionKey) -> bool {
        let Some(handle) = self.handle(key) else {
            return false;
        };
        let mut t = lock(&handle);
        let abandoned = t.abandon();
        if abandoned {
            tracing::warn!(
                transmission = %key,
                received = t.received(),
                total = t.total(),
                "transmission abandoned"
            );
        }
        abandoned
    }

    /// Drop all state for `key`, freeing its window slot.
    pub fn forget(&self, key: &TransmissionKey) -> bool {
        let removed = self.transmissions.remove(key).is_some();
        if removed {
            self.inflight.fetch_sub(1, Ordering::AcqRel);
        }
        removed
    }

    /// Collecting transmissions idle for longer than `older_than`.
    pub fn stalled(&self, older_than: Duration) -> Vec<StalledTransmission> {
        let handles: Vec<(TransmissionKey, Arc<Mutex<Transmission>>)> = self
            .transmissions
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        handles
            .into_iter()
            .filter_map(|(key, handle)| {
                let t = lock(&handle);
                let idle = t.idle_for();
                if t.state() != TransmissionState::Collecting || idle <= older_than {
                    return None;
                }
                Some(StalledTransmission {
                    key,
                    schema: t.schema(),
                    missing: t.missing(),
                    total: t.total(),
                    idle,
                    age: t.started_at().elapsed(),
                })
            })
            .collect()
    }

    pub fn keys(&self) -> Vec<TransmissionKey> {
        self.transmissions.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.transmissions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transmissions.is_empty()
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(&ReceiveSettings::default())
    }
}

//! Transmissions — send-side splitting and per-transmission receive state.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use fieldcast_core::digest::payload_digest;
use fieldcast_core::schema::SchemaId;
use fieldcast_core::wire::{WireError, DIGEST_LEN, MAX_PARTS};
use thiserror::Error;

use crate::part::Part;
use crate::reassembly::{Delivery, ReceiveError};

// ── Identity ──────────────────────────────────────────────────────────────────

/// Transmission ids are only unique per sender, so the receiver keys
/// state by both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransmissionKey {
    pub sender: String,
    pub id: u32,
}

impl TransmissionKey {
    pub fn new(sender: impl Into<String>, id: u32) -> Self {
        Self {
            sender: sender.into(),
            id,
        }
    }
}

impl fmt::Display for TransmissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.sender, self.id)
    }
}

/// Sender-local id allocator. Starts at a random value so ids from a
/// restarted sender are unlikely to collide with ones still in flight.
#[derive(Debug)]
pub struct TransmissionIds(AtomicU32);

impl TransmissionIds {
    pub fn new() -> Self {
        Self::starting_at(rand::random())
    }

    pub fn starting_at(first: u32) -> Self {
        Self(AtomicU32::new(first))
    }

    pub fn next(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for TransmissionIds {
    fn default() -> Self {
        Self::new()
    }
}

// ── Splitting ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SplitError {
    #[error("part capacity must be at least one byte")]
    ZeroCapacity,

    #[error("payload needs {parts} parts, maximum is {max}")]
    CapacityExceeded { parts: usize, max: u16 },
}

/// Number of parts `len` bytes occupy at `capacity` bytes per part.
/// An empty payload still travels as one empty part.
pub fn part_count(len: usize, capacity: usize) -> usize {
    if len == 0 {
        1
    } else {
        len.div_ceil(capacity)
    }
}

/// Greedy split of `payload` into parts of at most `capacity` fragment bytes.
pub fn split(
    schema: SchemaId,
    transmission_id: u32,
    payload: &[u8],
    capacity: usize,
) -> Result<Vec<Part>, SplitError> {
    split_with_limit(schema, transmission_id, payload, capacity, MAX_PARTS)
}

/// [`split`] with a part limit below the protocol maximum.
pub fn split_with_limit(
    schema: SchemaId,
    transmission_id: u32,
    payload: &[u8],
    capacity: usize,
    max_parts: u16,
) -> Result<Vec<Part>, SplitError> {
    if capacity == 0 {
        return Err(SplitError::ZeroCapacity);
    }
    let max = max_parts.min(MAX_PARTS);
    let count = part_count(payload.len(), capacity);
    if count > max as usize {
        return Err(SplitError::CapacityExceeded { parts: count, max });
    }

    let digest = payload_digest(payload);
    let total = count as u16;
    let payload = Bytes::copy_from_slice(payload);
    let parts = (0..count)
        .map(|i| {
            let start = i * capacity;
            let end = (start + capacity).min(payload.len());
            Part {
                schema,
                transmission_id,
                index: i as u16 + 1,
                total,
                digest,
                fragment: payload.slice(start..end),
            }
        })
        .collect();
    Ok(parts)
}

// ── Receive state ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmissionState {
    Collecting,
    /// Terminal. Every index in 1..=total arrived.
    Complete,
    /// Terminal. Fragments released, later parts dropped.
    Abandoned,
}

/// Outcome of checking a reconstructed payload against the header digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Integrity {
    Verified,
    Mismatch,
}

/// Receive-side state of one transmission. Callers serialise access.
#[derive(Debug)]
pub struct Transmission {
    id: u32,
    schema: SchemaId,
    total: u16,
    digest: [u8; DIGEST_LEN],
    fragments: Vec<Option<Bytes>>,
    received: u16,
    state: TransmissionState,
    payload: Option<(Bytes, Integrity)>,
    started_at: Instant,
    last_part_at: Instant,
}

impl Transmission {
    /// Start collecting with the identity declared by the first part seen.
    pub fn new(first: &Part) -> Self {
        let now = Instant::now();
        Self {
            id: first.transmission_id,
            schema: first.schema,
            total: first.total,
            digest: first.digest,
            fragments: vec![None; first.total as usize],
            received: 0,
            state: TransmissionState::Collecting,
            payload: None,
            started_at: now,
            last_part_at: now,
        }
    }

    pub fn schema(&self) -> SchemaId {
        self.schema
    }

    pub fn total(&self) -> u16 {
        self.total
    }

    pub fn received(&self) -> u16 {
        self.received
    }

    pub fn state(&self) -> TransmissionState {
        self.state
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn idle_for(&self) -> Duration {
        self.last_part_at.elapsed()
    }

    /// Store a part. Duplicates overwrite without double counting.
    pub fn accept(&mut self, part: Part) -> Result<Delivery, ReceiveError> {
        match self.state {
            TransmissionState::Abandoned => return Ok(Delivery::Dropped),
            TransmissionState::Complete => return Ok(Delivery::AlreadyComplete),
            TransmissionState::Collecting => {}
        }

        if part.total != self.total {
            return Err(ReceiveError::TotalConflict {
                id: self.id,
                expected: self.total,
                got: part.total,
            });
        }
        if part.schema != self.schema {
            return Err(ReceiveError::SchemaConflict {
                id: self.id,
                expected: self.schema,
                got: part.schema,
            });
        }
        if part.digest != self.digest {
            return Err(ReceiveError::DigestConflict {
                id: self.id,
                expected: hex::encode(self.digest),
                got: hex::encode(part.digest),
            });
        }
        if part.index == 0 || part.index > self.total {
            return Err(WireError::IndexOutOfRange {
                index: part.index,
                total: self.total,
            }
            .into());
        }

        let slot = &mut self.fragments[part.index as usize - 1];
        if slot.is_none() {
            self.received += 1;
        }
        *slot = Some(part.fragment);
        self.last_part_at = Instant::now();

        if self.received < self.total {
            return Ok(Delivery::Stored {
                received: self.received,
                total: self.total,
            });
        }

        let (payload, integrity) = self.complete();
        Ok(Delivery::Complete { payload, integrity })
    }

    fn complete(&mut self) -> (Bytes, Integrity) {
        let len = self.fragments.iter().flatten().map(Bytes::len).sum();
        let mut buf = BytesMut::with_capacity(len);
        for fragment in self.fragments.drain(..).flatten() {
            buf.extend_from_slice(&fragment);
        }
        let payload = buf.freeze();
        let integrity = if payload_digest(&payload) == self.digest {
            Integrity::Verified
        } else {
            Integrity::Mismatch
        };
        self.state = TransmissionState::Complete;
        self.payload = Some((payload.clone(), integrity));
        (payload, integrity)
    }

    /// Indices in 1..=total not yet stored. Empty unless collecting.
    pub fn missing(&self) -> Vec<u16> {
        if self.state != TransmissionState::Collecting {
            return Vec::new();
        }
        self.fragments
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_none())
            .map(|(i, _)| i as u16 + 1)
            .collect()
    }

    /// Reconstructed payload, once complete.
    pub fn payload(&self) -> Option<(Bytes, Integrity)> {
        self.payload.clone()
    }

    /// Release everything buffered. Returns false if already terminal.
    pub fn abandon(&mut self) -> bool {
        if self.state != TransmissionState::Collecting {
            return false;
        }
        self.state = TransmissionState::Abandoned;
        self.fragments = Vec::new();
        true
    }
}

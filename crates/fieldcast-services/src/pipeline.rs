//! Outbox and inbox — the two end-to-end entry points.
//!
//! Outbox: record → encode → split → parts (kept until acknowledged).
//! Inbox: part bytes → reassembly → resolve model → decode → record.
//!
//! Neither side decides when to send, resend or give up. They expose the
//! queries (missing parts, stalled transmissions) a caller needs to decide.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use fieldcast_core::config::{ReceiveSettings, TransmissionSettings};
use fieldcast_core::record::Record;
use fieldcast_core::schema::{CodecError, FactoredColumns, FactoredValues, Schema, SchemaId};
use fieldcast_core::ValueError;
use thiserror::Error;

use crate::model::{ModelProvider, UnknownModel};
use crate::part::Part;
use crate::reassembly::{CompletedPayload, Delivery, Reassembler, ReceiveError, StalledTransmission};
use crate::transmission::{split_with_limit, Integrity, SplitError, TransmissionIds, TransmissionKey, TransmissionState};
use crate::transport::{PartSink, TransportError};

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SendError {
    #[error(transparent)]
    UnknownModel(#[from] UnknownModel),

    #[error("encoding failed: {0}")]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Split(#[from] SplitError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("transmission {id} interrupted after {sent} parts: {source}")]
    Interrupted {
        id: u32,
        sent: usize,
        source: TransportError,
    },

    #[error("no sent transmission {0}")]
    UnknownTransmission(u32),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("no transmission {0}")]
    UnknownTransmission(TransmissionKey),

    #[error("{}/{total} parts missing", .missing.len())]
    Incomplete { missing: Vec<u16>, total: u16 },

    #[error("transmission {0} was abandoned")]
    Abandoned(TransmissionKey),

    #[error("transmission {0} failed its payload digest check")]
    IntegrityMismatch(TransmissionKey),

    #[error(transparent)]
    UnknownModel(#[from] UnknownModel),

    #[error("decoding failed: {0}")]
    Codec(#[from] CodecError),
}

// ── Outbox ────────────────────────────────────────────────────────────────────

/// A record turned into parts, ready for a transport.
#[derive(Debug, Clone)]
pub struct PreparedTransmission {
    pub id: u32,
    pub schema: SchemaId,
    pub destination: String,
    pub parts: Vec<Part>,
}

pub struct Outbox {
    provider: Arc<dyn ModelProvider>,
    defaults: TransmissionSettings,
    ids: TransmissionIds,
    sent: DashMap<u32, PreparedTransmission>,
}

impl Outbox {
    pub fn new(provider: Arc<dyn ModelProvider>, defaults: TransmissionSettings) -> Self {
        Self::with_ids(provider, defaults, TransmissionIds::new())
    }

    pub fn with_ids(
        provider: Arc<dyn ModelProvider>,
        defaults: TransmissionSettings,
        ids: TransmissionIds,
    ) -> Self {
        Self {
            provider,
            defaults,
            ids,
            sent: DashMap::new(),
        }
    }

    /// Encode and split `record`. The parts are retained for [`resend`](Self::resend).
    ///
    /// The record is only read; factored-out values stay in it.
    pub fn prepare(&self, record: &Record) -> Result<PreparedTransmission, SendError> {
        let id = record.schema().id();
        let resolved = self.provider.resolve(&id)?;
        let settings = self
            .provider
            .settings_for(&resolved.schema)
            .unwrap_or_else(|| self.defaults.clone());

        let payload = resolved.schema.encode(record, &resolved.factored)?;
        let transmission_id = self.ids.next();
        let parts = split_with_limit(
            id,
            transmission_id,
            &payload,
            settings.fragment_capacity(),
            settings.max_parts,
        )?;

        tracing::info!(
            transmission = transmission_id,
            schema = %id,
            bytes = payload.len(),
            parts = parts.len(),
            destination = %settings.destination,
            "transmission prepared"
        );

        let prepared = PreparedTransmission {
            id: transmission_id,
            schema: id,
            destination: settings.destination,
            parts,
        };
        self.sent.insert(transmission_id, prepared.clone());
        Ok(prepared)
    }

    /// Prepare `record` and hand every part to `sink`. Returns the transmission id.
    ///
    /// If the transport fails before the first part, nothing is retained.
    /// If it fails later, the parts stay retained so the receiver's missing
    /// indices can be resent; the error is [`SendError::Interrupted`].
    pub fn send(&self, record: &Record, sink: &dyn PartSink) -> Result<u32, SendError> {
        let prepared = self.prepare(record)?;
        if let Err(e) = sink.check_capacity(&prepared.parts) {
            self.sent.remove(&prepared.id);
            return Err(e.into());
        }
        for (sent, part) in prepared.parts.iter().enumerate() {
            if let Err(e) = sink.send(&prepared.destination, part.to_bytes()) {
                if sent == 0 {
                    self.sent.remove(&prepared.id);
                    return Err(e.into());
                }
                tracing::warn!(
                    transmission = prepared.id,
                    sent,
                    total = prepared.parts.len(),
                    error = %e,
                    "send interrupted, parts retained for resend"
                );
                return Err(SendError::Interrupted {
                    id: prepared.id,
                    sent,
                    source: e,
                });
            }
        }
        Ok(prepared.id)
    }

    /// Send again exactly the parts a receiver reported missing.
    pub fn resend(&self, id: u32, missing: &[u16], sink: &dyn PartSink) -> Result<usize, SendError> {
        let (destination, parts) = {
            let entry = self.sent.get(&id).ok_or(SendError::UnknownTransmission(id))?;
            let parts: Vec<Part> = entry
                .parts
                .iter()
                .filter(|p| missing.contains(&p.index))
                .cloned()
                .collect();
            (entry.destination.clone(), parts)
        };
        let n = sink.send_all(&destination, &parts)?;
        tracing::info!(transmission = id, requested = missing.len(), resent = n, "parts resent");
        Ok(n)
    }

    /// The receiver has the transmission; stop retaining its parts.
    pub fn acknowledge(&self, id: u32) -> bool {
        self.sent.remove(&id).is_some()
    }

    /// Ids of transmissions not yet acknowledged.
    pub fn pending(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.sent.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }
}

// ── Inbox ─────────────────────────────────────────────────────────────────────

pub struct Inbox {
    provider: Arc<dyn ModelProvider>,
    reassembler: Reassembler,
    stall_timeout: Duration,
}

impl Inbox {
    pub fn new(provider: Arc<dyn ModelProvider>, settings: &ReceiveSettings) -> Self {
        Self {
            provider,
            reassembler: Reassembler::new(settings),
            stall_timeout: Duration::from_secs(settings.stall_timeout_secs),
        }
    }

    pub fn receive(&self, sender: &str, bytes: Bytes) -> Result<(TransmissionKey, Delivery), ReceiveError> {
        self.reassembler.receive_bytes(sender, bytes)
    }

    pub fn receive_part(&self, sender: &str, part: Part) -> Result<Delivery, ReceiveError> {
        self.reassembler.receive(sender, part)
    }

    pub fn state(&self, key: &TransmissionKey) -> Option<TransmissionState> {
        self.reassembler.state(key)
    }

    pub fn missing_parts(&self, key: &TransmissionKey) -> Option<Vec<u16>> {
        self.reassembler.missing_parts(key)
    }

    pub fn abandon(&self, key: &TransmissionKey) -> bool {
        self.reassembler.abandon(key)
    }

    pub fn forget(&self, key: &TransmissionKey) -> bool {
        self.reassembler.forget(key)
    }

    /// Raw reconstructed payload, kept until a decode succeeds.
    pub fn raw_payload(&self, key: &TransmissionKey) -> Option<CompletedPayload> {
        self.reassembler.payload(key)
    }

    /// Collecting transmissions idle longer than the configured stall timeout.
    pub fn stalled(&self) -> Vec<StalledTransmission> {
        self.reassembler.stalled(self.stall_timeout)
    }

    pub fn stalled_for(&self, older_than: Duration) -> Vec<StalledTransmission> {
        self.reassembler.stalled(older_than)
    }

    pub fn reassembler(&self) -> &Reassembler {
        &self.reassembler
    }

    /// Decode a completed transmission and release it.
    ///
    /// `factored` must hold a value for every factored-out required column
    /// of the resolved schema; missing optional ones are taken as null.
    /// On any failure the raw payload stays available for a retry.
    pub fn decode(&self, key: &TransmissionKey, factored: &FactoredValues) -> Result<Record, DecodeError> {
        let status = self
            .reassembler
            .status(key)
            .ok_or_else(|| DecodeError::UnknownTransmission(key.clone()))?;
        match status.state {
            TransmissionState::Collecting => {
                return Err(DecodeError::Incomplete {
                    missing: status.missing,
                    total: status.total,
                });
            }
            TransmissionState::Abandoned => return Err(DecodeError::Abandoned(key.clone())),
            TransmissionState::Complete => {}
        }

        let completed = self
            .reassembler
            .payload(key)
            .ok_or_else(|| DecodeError::UnknownTransmission(key.clone()))?;
        if completed.integrity == Integrity::Mismatch {
            tracing::warn!(transmission = %key, "payload digest mismatch, not decoding");
            return Err(DecodeError::IntegrityMismatch(key.clone()));
        }

        let resolved = self.provider.resolve(&completed.schema).map_err(|e| {
            tracing::warn!(
                transmission = %key,
                schema = %completed.schema,
                "unknown model, payload retained"
            );
            e
        })?;

        let values = factored_values_for(&resolved.schema, &resolved.factored, factored)?;
        let record = Schema::decode(&resolved.schema, &completed.payload, &values).map_err(|e| {
            tracing::warn!(transmission = %key, error = %e, "decode failed, payload retained");
            e
        })?;

        self.reassembler.forget(key);
        tracing::info!(transmission = %key, schema = %completed.schema, "record decoded");
        Ok(record)
    }
}

/// Keep only the caller's values for columns the model factors out, nulling
/// optional ones the caller left out.
fn factored_values_for(
    schema: &Schema,
    factored: &FactoredColumns,
    supplied: &FactoredValues,
) -> Result<FactoredValues, CodecError> {
    let mut values = FactoredValues::new();
    for name in factored.iter() {
        match supplied.get(name) {
            Some(value) => values.insert(name, value.cloned()),
            None => {
                let optional = schema.column(name).map(|c| c.is_optional()).unwrap_or(false);
                if !optional {
                    return Err(ValueError::MissingRequired {
                        column: name.to_string(),
                    }
                    .into());
                }
                values.insert(name, None);
            }
        }
    }
    Ok(values)
}

//! Fieldcast wire format — the header in front of every transmitted part.
//!
//! These types ARE the part protocol. Every field, every size and every
//! reserved bit is part of the wire format. A receiver must be able to route
//! a part to its transmission and schema from the header alone.
//!
//! The header is #[repr(C, packed)] and uses zerocopy little-endian integer
//! types, so the layout is identical on every host. There is no unsafe code
//! in this module.

use static_assertions::assert_eq_size;
use zerocopy::byteorder::{LittleEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::schema::SchemaId;

// ── Constants ─────────────────────────────────────────────────────────────────

/// Current part format version.
pub const WIRE_VERSION: u8 = 0x01;

/// Size of [`PartHeader`] in bytes.
pub const PART_HEADER_SIZE: usize = 22;

/// Highest part count a transmission may declare. Matches the 8-bit
/// sequence space of concatenated SMS.
pub const MAX_PARTS: u16 = 255;

/// Bytes of the BLAKE3 payload digest carried in every header.
pub const DIGEST_LEN: usize = 4;

// ── Part Header ───────────────────────────────────────────────────────────────

/// Routing and identification metadata of one part.
///
/// Wire size: 22 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct PartHeader {
    /// Wire format version. Currently 0x01.
    pub version: u8,

    /// Reserved, must be zero.
    pub flags: u8,

    /// Schema identity of the transmitted record.
    pub model_id: U32<LittleEndian>,
    pub schema_id: U16<LittleEndian>,
    pub schema_version: U16<LittleEndian>,

    /// Sender-local transmission id. Unique per sender, not globally.
    pub transmission_id: U32<LittleEndian>,

    /// 1-based position of this part.
    pub part_index: U16<LittleEndian>,

    /// Number of parts in the transmission, 1..=MAX_PARTS.
    pub total_parts: U16<LittleEndian>,

    /// First DIGEST_LEN bytes of BLAKE3 over the whole payload.
    /// Identical in every part of one transmission.
    pub payload_digest: [u8; DIGEST_LEN],
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(PartHeader, [u8; PART_HEADER_SIZE]);

impl PartHeader {
    pub fn new(
        schema: SchemaId,
        transmission_id: u32,
        part_index: u16,
        total_parts: u16,
        payload_digest: [u8; DIGEST_LEN],
    ) -> Self {
        Self {
            version: WIRE_VERSION,
            flags: 0,
            model_id: U32::new(schema.model_id),
            schema_id: U16::new(schema.schema_id),
            schema_version: U16::new(schema.version),
            transmission_id: U32::new(transmission_id),
            part_index: U16::new(part_index),
            total_parts: U16::new(total_parts),
            payload_digest,
        }
    }

    /// Parse the header prefix of `bytes`. The remainder is the fragment.
    pub fn parse(bytes: &[u8]) -> Result<(Self, &[u8]), WireError> {
        if bytes.len() < PART_HEADER_SIZE {
            return Err(WireError::Truncated(bytes.len()));
        }
        let (head, fragment) = bytes.split_at(PART_HEADER_SIZE);
        let header = Self::read_from(head).ok_or(WireError::Truncated(bytes.len()))?;
        header.validate()?;
        Ok((header, fragment))
    }

    pub fn validate(&self) -> Result<(), WireError> {
        if self.version != WIRE_VERSION {
            return Err(WireError::UnknownVersion(self.version));
        }
        if self.flags != 0 {
            return Err(WireError::ReservedFlagsSet(self.flags));
        }
        let total = self.total_parts();
        if total == 0 || total > MAX_PARTS {
            return Err(WireError::TooManyParts(total));
        }
        let index = self.part_index();
        if index == 0 || index > total {
            return Err(WireError::IndexOutOfRange { index, total });
        }
        Ok(())
    }

    pub fn schema(&self) -> SchemaId {
        SchemaId::new(
            self.model_id.get(),
            self.schema_id.get(),
            self.schema_version.get(),
        )
    }

    pub fn transmission_id(&self) -> u32 {
        self.transmission_id.get()
    }

    pub fn part_index(&self) -> u16 {
        self.part_index.get()
    }

    pub fn total_parts(&self) -> u16 {
        self.total_parts.get()
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unknown part version: 0x{0:02x}")]
    UnknownVersion(u8),

    #[error("reserved flags are non-zero: 0x{0:02x}")]
    ReservedFlagsSet(u8),

    #[error("part of {0} bytes is shorter than the {PART_HEADER_SIZE}-byte header")]
    Truncated(usize),

    #[error("total part count {0} outside 1..={MAX_PARTS}")]
    TooManyParts(u16),

    #[error("part index {index} outside 1..={total}")]
    IndexOutOfRange { index: u16, total: u16 },
}

// ── Tests ─────────────────────────────────────────────────────────────────────

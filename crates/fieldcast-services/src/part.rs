//! Part types — the bounded-size unit handed to a transport.

use bytes::{BufMut, Bytes, BytesMut};
use fieldcast_core::schema::SchemaId;
use fieldcast_core::wire::{PartHeader, WireError, DIGEST_LEN, PART_HEADER_SIZE};
use zerocopy::AsBytes;

/// One addressed fragment of a transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub schema: SchemaId,
    pub transmission_id: u32,
    /// 1-based.
    pub index: u16,
    pub total: u16,
    pub digest: [u8; DIGEST_LEN],
    pub fragment: Bytes,
}

impl Part {
    pub fn header(&self) -> PartHeader {
        PartHeader::new(
            self.schema,
            self.transmission_id,
            self.index,
            self.total,
            self.digest,
        )
    }

    /// Serialized size: header plus fragment.
    pub fn wire_len(&self) -> usize {
        PART_HEADER_SIZE + self.fragment.len()
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        buf.put_slice(self.header().as_bytes());
        buf.put_slice(&self.fragment);
        buf.freeze()
    }

    /// Parse a serialized part. The fragment shares `bytes`' allocation.
    pub fn from_bytes(bytes: Bytes) -> Result<Self, WireError> {
        let (header, _) = PartHeader::parse(&bytes)?;
        Ok(Self {
            schema: header.schema(),
            transmission_id: header.transmission_id(),
            index: header.part_index(),
            total: header.total_parts(),
            digest: header.payload_digest,
            fragment: bytes.slice(PART_HEADER_SIZE..),
        })
    }
}

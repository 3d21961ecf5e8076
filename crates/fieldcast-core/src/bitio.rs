//! Bit-granular stream primitives used by every column codec.
//!
//! Both halves work MSB-first. The writer never inserts alignment padding
//! except when the stream is closed with [`BitWriter::finish`], which pads
//! the final partial byte with zero bits. The reader has no notion of where
//! the padding starts; callers read exactly what was written.

use thiserror::Error;

/// Widest single primitive that can be read or written in one call.
pub const MAX_WIDTH: usize = 64;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BitIoError {
    #[error("end of bit stream: requested {requested} bits, {available} remaining")]
    EndOfStream { requested: usize, available: usize },

    #[error("invalid bit count {0} (maximum {MAX_WIDTH})")]
    InvalidBitCount(usize),

    #[error("value {value} does not fit in {bits} bits")]
    ValueOutOfRange { value: i128, bits: usize },
}

// ── Writer ────────────────────────────────────────────────────────────────────

/// Accumulates bits into a byte buffer.
///
/// `bit_buffer` holds at most 7 pending bits, MSB-aligned.
#[derive(Debug, Clone, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    bit_buffer: u8,
    bit_count: u8,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write the lowest `count` bits of `value`, most significant first.
    ///
    /// Fails if `count` exceeds 64 or if `value` has bits set above `count`.
    pub fn write_bits(&mut self, value: u64, count: usize) -> Result<(), BitIoError> {
        if count > MAX_WIDTH {
            return Err(BitIoError::InvalidBitCount(count));
        }
        if count < MAX_WIDTH && value >> count != 0 {
            return Err(BitIoError::ValueOutOfRange {
                value: value as i128,
                bits: count,
            });
        }

        let mut remaining = count;
        while remaining > 0 {
            let free = 8 - self.bit_count as usize;
            let take = remaining.min(free);
            let shift = remaining - take;
            let bits = ((value >> shift) & ((1u64 << take) - 1)) as u8;

            self.bit_buffer |= bits << (free - take);
            self.bit_count += take as u8;
            if self.bit_count == 8 {
                self.bytes.push(self.bit_buffer);
                self.bit_buffer = 0;
                self.bit_count = 0;
            }
            remaining -= take;
        }

        Ok(())
    }

    pub fn write_bit(&mut self, bit: bool) -> Result<(), BitIoError> {
        self.write_bits(bit as u64, 1)
    }

    /// Write a two's complement integer in exactly `count` bits.
    pub fn write_signed(&mut self, value: i64, count: usize) -> Result<(), BitIoError> {
        if count == 0 || count > MAX_WIDTH {
            return Err(BitIoError::InvalidBitCount(count));
        }
        let min = -(1i128 << (count - 1));
        let max = (1i128 << (count - 1)) - 1;
        if (value as i128) < min || (value as i128) > max {
            return Err(BitIoError::ValueOutOfRange {
                value: value as i128,
                bits: count,
            });
        }
        let mask = if count == MAX_WIDTH {
            u64::MAX
        } else {
            (1u64 << count) - 1
        };
        self.write_bits(value as u64 & mask, count)
    }

    /// Write a raw run of whole bytes at the current (possibly unaligned) position.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), BitIoError> {
        for &byte in bytes {
            self.write_bits(byte as u64, 8)?;
        }
        Ok(())
    }

    /// Number of bits written so far, excluding close padding.
    pub fn bit_len(&self) -> usize {
        self.bytes.len() * 8 + self.bit_count as usize
    }

    /// Close the stream, zero-padding the final byte.
    pub fn finish(mut self) -> Vec<u8> {
        if self.bit_count > 0 {
            self.bytes.push(self.bit_buffer);
        }
        self.bytes
    }
}

// ── Reader ────────────────────────────────────────────────────────────────────

/// Reads bits MSB-first from a borrowed buffer.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    bit_position: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            bit_position: 0,
        }
    }

    pub fn read_bits(&mut self, count: usize) -> Result<u64, BitIoError> {
        if count > MAX_WIDTH {
            return Err(BitIoError::InvalidBitCount(count));
        }
        let available = self.bits_remaining();
        if count > available {
            return Err(BitIoError::EndOfStream {
                requested: count,
                available,
            });
        }

        let mut result = 0u64;
        let mut remaining = count;
        while remaining > 0 {
            let byte = self.data[self.bit_position / 8];
            let offset = self.bit_position % 8;
            let in_byte = 8 - offset;
            let take = remaining.min(in_byte);
            let mask = ((1u16 << take) - 1) as u8;
            let bits = (byte >> (in_byte - take)) & mask;

            // take <= 8, so the shift never drops bits we still need
            result = (result << take) | bits as u64;
            self.bit_position += take;
            remaining -= take;
        }

        Ok(result)
    }

    pub fn read_bit(&mut self) -> Result<bool, BitIoError> {
        Ok(self.read_bits(1)? == 1)
    }

    /// Read a two's complement integer of `count` bits and sign-extend it.
    pub fn read_signed(&mut self, count: usize) -> Result<i64, BitIoError> {
        if count == 0 || count > MAX_WIDTH {
            return Err(BitIoError::InvalidBitCount(count));
        }
        let raw = self.read_bits(count)?;
        if count == MAX_WIDTH {
            return Ok(raw as i64);
        }
        let shift = MAX_WIDTH - count;
        Ok(((raw << shift) as i64) >> shift)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, BitIoError> {
        let available = self.bits_remaining();
        if len * 8 > available {
            return Err(BitIoError::EndOfStream {
                requested: len * 8,
                available,
            });
        }
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(self.read_bits(8)? as u8);
        }
        Ok(out)
    }

    pub fn bits_remaining(&self) -> usize {
        self.data.len() * 8 - self.bit_position
    }

    pub fn position(&self) -> usize {
        self.bit_position
    }
}

/// Number of bits needed to represent every value in `0..=max`.
pub fn bits_for(max: u64) -> usize {
    (u64::BITS - max.leading_zeros()) as usize
}

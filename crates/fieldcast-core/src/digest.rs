//! BLAKE3 hashing — schema fingerprints and transmission payload digests.

use crate::wire::DIGEST_LEN;

/// Hash a byte slice, returning a 32-byte BLAKE3 digest.
pub fn hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Truncated digest of a whole transmission payload, carried in every part header.
///
/// Four bytes is enough to catch parts of two different transmissions that
/// ended up under the same id; it is not an authenticity check.
pub fn payload_digest(payload: &[u8]) -> [u8; DIGEST_LEN] {
    let mut digest = [0u8; DIGEST_LEN];
    digest.copy_from_slice(&blake3::hash(payload).as_bytes()[..DIGEST_LEN]);
    digest
}

/// Incremental BLAKE3 hasher for inputs that arrive in pieces.
///
/// # Example
/// ```
/// use fieldcast_core::digest::Hasher;
/// let mut h = Hasher::new();
/// h.update(b"hello ");
/// h.update(b"world");
/// let digest = h.finalize();
/// assert_eq!(digest, fieldcast_core::digest::hash(b"hello world"));
/// ```
pub struct Hasher(blake3::Hasher);

impl Hasher {
    pub fn new() -> Self {
        Self(blake3::Hasher::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> [u8; 32] {
        *self.0.finalize().as_bytes()
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

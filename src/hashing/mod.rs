//! BLAKE3 helpers for cache keys and deterministic seeds.

use blake3::Hasher;

/// First 8 bytes of the BLAKE3 digest, little-endian.
///
/// Used for seeding and bucketing, never for integrity checks.
#[inline]
pub fn hash_to_u64(data: &[u8]) -> u64 {
    let hash = blake3::hash(data);
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

/// Hashes a sequence of fields with a length prefix per field, so `["ab", "c"]` and
/// `["a", "bc"]` produce different keys.
pub fn hash_fields<'a, I>(fields: I) -> [u8; 32]
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut hasher = Hasher::new();
    for field in fields {
        hasher.update(&(field.len() as u64).to_le_bytes());
        hasher.update(field);
    }
    *hasher.finalize().as_bytes()
}

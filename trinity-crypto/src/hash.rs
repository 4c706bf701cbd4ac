use sha3::{Digest, Keccak256};
use trinity_types::primitives::Hash;

/// BLAKE3 in derive-key mode. `context` keeps ids derived for different
/// purposes apart even over identical input.
pub fn blake3_hash_domain(context: &str, data: &[u8]) -> Hash {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    hasher.update(data);
    *hasher.finalize().as_bytes()
}

/// Keccak-256, as the ledger validators use for Merkle commitments.
pub fn keccak256(data: &[u8]) -> Hash {
    Keccak256::digest(data).into()
}

/// Keccak-256 over the concatenation of `parts`.
pub fn keccak256_multi(parts: &[&[u8]]) -> Hash {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_key_contexts_differ() {
        let data = b"operation fingerprint";
        assert_ne!(
            blake3_hash_domain("trinity operation id", data),
            blake3_hash_domain("trinity something else", data)
        );
        assert_ne!(blake3_hash_domain("trinity operation id", data), keccak256(data));
    }

    #[test]
    fn test_keccak256_empty_input() {
        // Keccak-256, not the NIST SHA3-256 padding.
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_keccak256_multi_is_concatenation() {
        let parts: [&[u8]; 3] = [b"trinity", b":", b"leaf"];
        assert_eq!(keccak256_multi(&parts), keccak256(b"trinity:leaf"));
    }
}

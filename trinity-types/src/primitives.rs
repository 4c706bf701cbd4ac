use serde::{Deserialize, Serialize};

/// 32-byte hash (BLAKE3 for fingerprints, Keccak-256 for ledger commitments).
pub type Hash = [u8; 32];

/// 32-byte Ed25519 public key.
pub type PublicKey = [u8; 32];

/// 64-byte Ed25519 signature.
pub type Signature = [u8; 64];

/// 20-byte address: the last 20 bytes of keccak256(pubkey).
pub type Address = [u8; 20];

/// Content-derived operation fingerprint.
pub type OperationId = Hash;

/// Amount in the smallest fee unit.
pub type Amount = u128;

/// Unix timestamp in seconds (ledger time, supplied by the host).
pub type Timestamp = u64;

/// Identifier of an accounting epoch.
pub type EpochId = u64;

/// Per-sender transaction counter on a ledger.
pub type Nonce = u64;

/// The all-zero hash.
pub const ZERO_HASH: Hash = [0u8; 32];

/// Serde helper for [u8; 64] fields.
pub mod serde_sig {
    use serde::{self, Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(value: &[u8; 64], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value.as_slice().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 64], D::Error>
    where
        D: Deserializer<'de>,
    {
        let v: Vec<u8> = Vec::deserialize(deserializer)?;
        v.try_into()
            .map_err(|_| serde::de::Error::custom("expected 64 bytes for signature"))
    }
}

/// A value expressed in basis points (1/10_000).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BasisPoints(pub u32);

impl BasisPoints {
    /// 100%.
    pub const ONE: BasisPoints = BasisPoints(10_000);

    /// Apply to an amount, rounding down. Exact for every amount at or below
    /// 100%; saturates above it instead of overflowing.
    pub fn apply(self, amount: Amount) -> Amount {
        let bp = self.0 as Amount;
        (amount / 10_000)
            .saturating_mul(bp)
            .saturating_add(amount % 10_000 * bp / 10_000)
    }
}

/// Render the first bytes of a hash for log fields.
pub fn short_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take(6)
        .map(|b| format!("{:02x}", b))
        .collect::<String>()
}

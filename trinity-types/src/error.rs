use thiserror::Error;

/// Errors raised below the coordinator: key handling, Merkle construction,
/// parameter validation and encoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrinityError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid key material")]
    InvalidKeyMaterial,

    #[error("sibling path of {depth} exceeds the maximum of {max}")]
    MerklePathTooLong { depth: usize, max: usize },

    #[error("leaf {index} does not exist in a tree of {leaves}")]
    LeafIndexOutOfRange { index: usize, leaves: usize },

    #[error("invalid protocol parameters: {reason}")]
    InvalidParams { reason: String },

    #[error("failed to encode {reason}")]
    SerializationError { reason: String },
}

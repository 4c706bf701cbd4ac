use thiserror::Error;

use trinity_types::ledger::LedgerId;

/// Errors from the key-value backends and the relayer's typed view of them.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{backend} store lock poisoned")]
    Poisoned { backend: &'static str },

    #[error("sqlite: {reason}")]
    Sqlite { reason: String },

    #[error("value under {key} is corrupt: {reason}")]
    CorruptValue { key: String, reason: String },

    #[error("cannot encode value for {key}: {reason}")]
    Encode { key: String, reason: String },

    #[error("nonce space exhausted on the {ledger} lane")]
    NonceOverflow { ledger: LedgerId },

    #[error("batch of {ops} writes rolled back: {reason}")]
    BatchAborted { ops: usize, reason: String },
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Sqlite {
            reason: err.to_string(),
        }
    }
}

use trinity_types::constants::OPERATION_ID_CONTEXT;
use trinity_types::error::TrinityError;
use trinity_types::operation::OperationFingerprint;
use trinity_types::primitives::OperationId;

use crate::hash::blake3_hash_domain;

/// Derive the content fingerprint of an operation.
///
/// BLAKE3 in derive-key mode over the borsh encoding of the fingerprint, so
/// field boundaries are unambiguous and the id cannot collide with any other
/// hash produced in this workspace.
pub fn operation_id(fingerprint: &OperationFingerprint) -> Result<OperationId, TrinityError> {
    let bytes = borsh::to_vec(fingerprint).map_err(|e| TrinityError::SerializationError {
        reason: e.to_string(),
    })?;
    Ok(blake3_hash_domain(OPERATION_ID_CONTEXT, &bytes))
}

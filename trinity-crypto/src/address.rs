//! Ledger-style addresses for initiators and payout recipients.

use trinity_types::primitives::{Address, PublicKey};

use crate::hash::keccak256;

/// The address a public key pays and is paid from: the last 20 bytes of its
/// Keccak-256 digest.
pub fn pubkey_to_address(pubkey: &PublicKey) -> Address {
    let digest = keccak256(pubkey);
    let mut address = [0u8; 20];
    address.copy_from_slice(&digest[12..]);
    address
}

/// `0x`-prefixed lowercase hex.
pub fn format_address(address: &Address) -> String {
    format!("0x{}", hex::encode(address))
}

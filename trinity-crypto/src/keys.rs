//! Ed25519 identities: initiators, relayer submitters and the emergency
//! controller all sign with these.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use trinity_types::error::TrinityError;
use trinity_types::primitives::{short_hex, PublicKey, Signature};
use zeroize::Zeroizing;

/// An Ed25519 signing identity. The secret is wiped on drop.
pub struct Keypair {
    signing: SigningKey,
}

impl Keypair {
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut rand::rngs::OsRng),
        }
    }

    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(seed),
        }
    }

    /// Parse a 64-character hex seed, as written in node configuration.
    pub fn from_hex_seed(hex_seed: &str) -> Result<Self, TrinityError> {
        let mut seed = Zeroizing::new([0u8; 32]);
        hex::decode_to_slice(hex_seed.trim(), &mut seed[..])
            .map_err(|_| TrinityError::InvalidKeyMaterial)?;
        Ok(Self::from_seed(&seed))
    }

    pub fn public_key(&self) -> PublicKey {
        self.signing.verifying_key().to_bytes()
    }

    pub fn seed(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.signing.to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("public_key", &short_hex(&self.public_key()))
            .finish_non_exhaustive()
    }
}

/// Check `signature` over `message` against `pubkey`.
pub fn verify(
    message: &[u8],
    signature: &Signature,
    pubkey: &PublicKey,
) -> Result<(), TrinityError> {
    let key = VerifyingKey::from_bytes(pubkey).map_err(|_| TrinityError::InvalidKeyMaterial)?;
    key.verify(message, &ed25519_dalek::Signature::from_bytes(signature))
        .map_err(|_| TrinityError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_binds_message() {
        let relayer = Keypair::from_seed(&[3u8; 32]);
        let sig = relayer.sign(b"trinity:proof:a");
        assert!(verify(b"trinity:proof:a", &sig, &relayer.public_key()).is_ok());
        assert_eq!(
            verify(b"trinity:proof:b", &sig, &relayer.public_key()),
            Err(TrinityError::InvalidSignature)
        );
    }

    #[test]
    fn test_signature_binds_signer() {
        let controller = Keypair::generate();
        let impostor = Keypair::generate();
        let sig = impostor.sign(b"trinity:controller:pause");
        assert!(verify(b"trinity:controller:pause", &sig, &controller.public_key()).is_err());
    }

    #[test]
    fn test_hex_seed_matches_raw_seed() {
        let kp = Keypair::from_hex_seed(&"2a".repeat(32)).unwrap();
        assert_eq!(kp.public_key(), Keypair::from_seed(&[0x2a; 32]).public_key());
        assert_eq!(*kp.seed(), [0x2a; 32]);
    }

    #[test]
    fn test_malformed_hex_seed() {
        assert!(Keypair::from_hex_seed("abcd").is_err());
        assert!(Keypair::from_hex_seed(&"zz".repeat(32)).is_err());
        assert!(Keypair::from_hex_seed(&"2a".repeat(33)).is_err());
    }

    #[test]
    fn test_debug_hides_secret() {
        let kp = Keypair::from_seed(&[0x2a; 32]);
        let debug = format!("{:?}", kp);
        assert!(!debug.contains(&"2a".repeat(32)));
        assert!(debug.contains(&short_hex(&kp.public_key())));
    }
}

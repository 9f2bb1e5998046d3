//! secp256k1 key pairs, recoverable ECDSA, and address derivation.
//!
//! Signatures are 65 bytes (`r ‖ s ‖ v`) for transactions, where `v` is the
//! recovery id, and 64 bytes (`r ‖ s`) for block headers. Header signatures
//! are checked by attempting recovery with both ids and comparing the
//! derived identity against the elected validator. Addresses follow the
//! Ethereum convention: the last 20 bytes of the Keccak-256 digest of the
//! uncompressed public key.

use crate::hash::{keccak256, sha256};
use axon_types::app::{Address, ChainTransaction, Hash256, ValidatorId};
use axon_types::error::CryptoError;
use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;

/// A secp256k1 signing key pair.
#[derive(Clone)]
pub struct Keypair {
    secret: SigningKey,
}

impl Keypair {
    /// Generates a fresh random key pair.
    pub fn generate() -> Self {
        Keypair {
            secret: SigningKey::random(&mut OsRng),
        }
    }

    /// Reconstructs a key pair from a 32-byte secret scalar.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKey(format!(
                "secret key must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let secret = SigningKey::from_slice(bytes)
            .map_err(|e| CryptoError::InvalidKey(format!("invalid secret scalar: {}", e)))?;
        Ok(Keypair { secret })
    }

    /// The 32-byte secret scalar.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes().into()
    }

    /// The uncompressed SEC1 public key (65 bytes, `0x04` prefixed).
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.secret
            .verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec()
    }

    /// The 32-byte validator identity: Keccak-256 of the raw public key.
    pub fn validator_id(&self) -> ValidatorId {
        let point = self.secret.verifying_key().to_encoded_point(false);
        keccak256(strip_sec1_prefix(point.as_bytes()))
    }

    /// The account address: the last 20 bytes of the validator identity.
    pub fn address(&self) -> Address {
        Address::from_validator_id(&self.validator_id())
    }

    /// Signs `message` with this key, producing a 65-byte `r ‖ s ‖ v`
    /// signature over the SHA-256 digest of the message.
    pub fn sign(&self, message: &[u8]) -> Result<[u8; 65], CryptoError> {
        let prehash = sha256(message);
        let (signature, recovery_id) = self
            .secret
            .sign_prehash_recoverable(&prehash)
            .map_err(|e| CryptoError::InvalidSignature(format!("signing failed: {}", e)))?;
        let mut out = [0u8; 65];
        let (sig_part, v_part) = out.split_at_mut(64);
        sig_part.copy_from_slice(&signature.to_bytes());
        if let Some(v) = v_part.first_mut() {
            *v = recovery_id.to_byte();
        }
        Ok(out)
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the secret.
        write!(f, "Keypair({})", self.address())
    }
}

fn strip_sec1_prefix(bytes: &[u8]) -> &[u8] {
    match bytes.split_first() {
        Some((&0x04, raw)) if raw.len() == 64 => raw,
        _ => bytes,
    }
}

fn parse_public_key(public_key: &[u8]) -> Result<VerifyingKey, CryptoError> {
    // Accept SEC1-encoded keys (33 or 65 bytes) and raw 64-byte points.
    if public_key.len() == 64 {
        let mut sec1 = Vec::with_capacity(65);
        sec1.push(0x04);
        sec1.extend_from_slice(public_key);
        return VerifyingKey::from_sec1_bytes(&sec1)
            .map_err(|e| CryptoError::InvalidKey(format!("invalid public key: {}", e)));
    }
    VerifyingKey::from_sec1_bytes(public_key)
        .map_err(|e| CryptoError::InvalidKey(format!("invalid public key: {}", e)))
}

fn split_signature(signature: &[u8]) -> Result<(Signature, RecoveryId), CryptoError> {
    if signature.len() != 65 {
        return Err(CryptoError::InvalidSignature(format!(
            "signature must be 65 bytes, got {}",
            signature.len()
        )));
    }
    let (sig_bytes, v_byte) = signature.split_at(64);
    let sig = Signature::from_slice(sig_bytes)
        .map_err(|e| CryptoError::InvalidSignature(format!("invalid r/s: {}", e)))?;
    let v = v_byte.first().copied().unwrap_or_default();
    // Accept both the raw recovery id and the legacy 27/28 convention.
    let v = if v >= 27 { v - 27 } else { v };
    let recovery_id = RecoveryId::from_byte(v)
        .ok_or_else(|| CryptoError::InvalidSignature(format!("invalid recovery id {}", v)))?;
    Ok((sig, recovery_id))
}

/// Derives the account address from a public key (SEC1 or raw 64-byte).
pub fn address_from_public(public_key: &[u8]) -> Result<Address, CryptoError> {
    Ok(Address::from_validator_id(&validator_id_from_public(
        public_key,
    )?))
}

/// Derives the 32-byte validator identity from a public key.
pub fn validator_id_from_public(public_key: &[u8]) -> Result<ValidatorId, CryptoError> {
    let key = parse_public_key(public_key)?;
    let point = key.to_encoded_point(false);
    Ok(keccak256(strip_sec1_prefix(point.as_bytes())))
}

/// Verifies a 65-byte signature over `message` against `public_key`.
///
/// Returns `false` for any malformed input; never panics.
pub fn verify_signature(message: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
    let prehash = sha256(message);
    let Ok((sig, _)) = split_signature(signature) else {
        return false;
    };
    let Ok(key) = parse_public_key(public_key) else {
        return false;
    };
    key.verify_prehash(&prehash, &sig).is_ok()
}

/// Recovers the signer's address from a 65-byte signature over `message`.
pub fn recover_address(message: &[u8], signature: &[u8]) -> Result<Address, CryptoError> {
    let prehash = sha256(message);
    let (sig, recovery_id) = split_signature(signature)?;
    let key = VerifyingKey::recover_from_prehash(&prehash, &sig, recovery_id)
        .map_err(|_| CryptoError::VerificationFailed)?;
    let point = key.to_encoded_point(false);
    Ok(Address::from_validator_id(&keccak256(strip_sec1_prefix(
        point.as_bytes(),
    ))))
}

/// Verifies a 64-byte header signature against an expected validator
/// identity by attempting recovery with both recovery ids.
pub fn verify_header_signature(
    message: &[u8],
    signature: &[u8; 64],
    expected: &ValidatorId,
) -> bool {
    let prehash = sha256(message);
    let Ok(sig) = Signature::from_slice(signature) else {
        return false;
    };
    for v in [0u8, 1u8] {
        let Some(recovery_id) = RecoveryId::from_byte(v) else {
            continue;
        };
        if let Ok(key) = VerifyingKey::recover_from_prehash(&prehash, &sig, recovery_id) {
            let point = key.to_encoded_point(false);
            if &keccak256(strip_sec1_prefix(point.as_bytes())) == expected {
                return true;
            }
        }
    }
    false
}

/// Signs a chain transaction in place, filling its `(v, r, s)` fields.
pub fn sign_transaction(tx: &mut ChainTransaction, keypair: &Keypair) -> Result<(), CryptoError> {
    let signature = keypair.sign(&tx.signing_preimage())?;
    let (sig_bytes, v_byte) = signature.split_at(64);
    let (r_bytes, s_bytes) = sig_bytes.split_at(32);
    let mut r: Hash256 = [0u8; 32];
    let mut s: Hash256 = [0u8; 32];
    r.copy_from_slice(r_bytes);
    s.copy_from_slice(s_bytes);
    tx.set_signature(v_byte.first().copied().unwrap_or_default(), r, s);
    Ok(())
}

/// Verifies a chain transaction's signature and checks that the recovered
/// signer matches the declared `from` address.
pub fn verify_transaction(tx: &ChainTransaction) -> Result<(), CryptoError> {
    let (v, r, s) = tx.signature();
    let mut signature = [0u8; 65];
    let (sig_part, v_part) = signature.split_at_mut(64);
    let (r_part, s_part) = sig_part.split_at_mut(32);
    r_part.copy_from_slice(&r);
    s_part.copy_from_slice(&s);
    if let Some(b) = v_part.first_mut() {
        *b = v;
    }
    let recovered = recover_address(&tx.signing_preimage(), &signature)?;
    let claimed = tx.from();
    if recovered != claimed {
        return Err(CryptoError::SignerMismatch { recovered, claimed });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axon_types::app::Transaction;

    #[test]
    fn keypair_from_secret_is_deterministic() {
        let keypair = Keypair::generate();
        let restored = Keypair::from_secret_bytes(&keypair.secret_bytes()).unwrap();
        assert_eq!(keypair.address(), restored.address());
        assert_eq!(keypair.public_key_bytes(), restored.public_key_bytes());
    }

    #[test]
    fn invalid_secret_lengths_are_rejected() {
        assert!(matches!(
            Keypair::from_secret_bytes(&[1u8; 31]),
            Err(CryptoError::InvalidKey(_))
        ));
        assert!(matches!(
            Keypair::from_secret_bytes(&[0u8; 32]),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn sign_verify_roundtrip() {
        let keypair = Keypair::generate();
        let message = b"the chain task owns the tip";
        let signature = keypair.sign(message).unwrap();
        assert!(verify_signature(
            message,
            &signature,
            &keypair.public_key_bytes()
        ));
    }

    #[test]
    fn bit_flips_break_verification() {
        let keypair = Keypair::generate();
        let message = b"flip me";
        let signature = keypair.sign(message).unwrap();

        let mut bad_message = message.to_vec();
        bad_message[0] ^= 1;
        assert!(!verify_signature(
            &bad_message,
            &signature,
            &keypair.public_key_bytes()
        ));

        let mut bad_signature = signature;
        bad_signature[10] ^= 1;
        assert!(!verify_signature(
            message,
            &bad_signature,
            &keypair.public_key_bytes()
        ));
    }

    #[test]
    fn recovery_yields_signer_address() {
        let keypair = Keypair::generate();
        let message = b"recover me";
        let signature = keypair.sign(message).unwrap();
        assert_eq!(recover_address(message, &signature).unwrap(), keypair.address());
    }

    #[test]
    fn header_signature_matches_validator_id() {
        let keypair = Keypair::generate();
        let message = b"header preimage";
        let full = keypair.sign(message).unwrap();
        let mut sig64 = [0u8; 64];
        sig64.copy_from_slice(&full[..64]);
        assert!(verify_header_signature(
            message,
            &sig64,
            &keypair.validator_id()
        ));
        let other = Keypair::generate();
        assert!(!verify_header_signature(
            message,
            &sig64,
            &other.validator_id()
        ));
    }

    #[test]
    fn transaction_sign_and_verify() {
        let keypair = Keypair::generate();
        let mut tx = ChainTransaction::Transfer(Transaction::transfer(
            0,
            keypair.address(),
            Address([9u8; 20]),
            1000,
            1,
            21_000,
        ));
        sign_transaction(&mut tx, &keypair).unwrap();
        verify_transaction(&tx).unwrap();
    }

    #[test]
    fn transaction_with_wrong_sender_is_rejected() {
        let keypair = Keypair::generate();
        let mut tx = ChainTransaction::Transfer(Transaction::transfer(
            0,
            Address([1u8; 20]), // not the signer's address
            Address([9u8; 20]),
            1000,
            1,
            21_000,
        ));
        sign_transaction(&mut tx, &keypair).unwrap();
        assert!(matches!(
            verify_transaction(&tx),
            Err(CryptoError::SignerMismatch { .. })
        ));
    }

    #[test]
    fn unsigned_transaction_is_rejected() {
        let tx = ChainTransaction::Transfer(Transaction::transfer(
            0,
            Address([1u8; 20]),
            Address([9u8; 20]),
            1000,
            1,
            21_000,
        ));
        assert!(verify_transaction(&tx).is_err());
    }

    #[test]
    fn address_matches_keccak_convention() {
        let keypair = Keypair::generate();
        let public = keypair.public_key_bytes();
        let derived = address_from_public(&public).unwrap();
        assert_eq!(derived, keypair.address());
        // Raw 64-byte form resolves to the same address.
        let raw = &public[1..];
        assert_eq!(address_from_public(raw).unwrap(), derived);
    }
}

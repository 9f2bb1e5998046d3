//! SHA-256 and Keccak-256 digest helpers.

use axon_types::app::Hash256;
use sha2::Digest as Sha2Digest;
use sha3::Digest as Sha3Digest;

/// Computes the SHA-256 digest of `data`.
pub fn sha256(data: &[u8]) -> Hash256 {
    sha2::Sha256::digest(data).into()
}

/// Computes the Keccak-256 digest of `data` (Ethereum-style, pre-NIST
/// padding).
pub fn keccak256(data: &[u8]) -> Hash256 {
    sha3::Keccak256::digest(data).into()
}

#![forbid(unsafe_code)]
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]

//! # Axon Crypto
//!
//! Cryptographic primitives for the Axon chain: SHA-256 and Keccak-256
//! digests, secp256k1 key pairs with recoverable ECDSA signatures,
//! Ethereum-style address derivation, and a Merkle tree with inclusion
//! proofs.
//!
//! Signature verification never panics: malformed inputs are reported as
//! `CryptoError` values or a `false` verdict.

/// SHA-256 and Keccak-256 digest helpers.
pub mod hash;
/// secp256k1 key pairs, recoverable ECDSA, and address derivation.
pub mod keys;
/// Merkle tree with inclusion proofs over 32-byte leaves.
pub mod merkle;

pub use hash::{keccak256, sha256};
pub use keys::{
    address_from_public, recover_address, sign_transaction, validator_id_from_public,
    verify_header_signature, verify_signature, verify_transaction, Keypair,
};
pub use merkle::MerkleTree;

//! Core application-level data structures like blocks, accounts, and transactions.

/// Block and header structures plus the deterministic header hash.
pub mod block;
/// Validator records and the canonical validator ordering.
pub mod consensus;
/// Execution receipts.
pub mod receipt;
/// The transaction sum type and its variants.
pub mod transaction;

pub use block::*;
pub use consensus::*;
pub use receipt::*;
pub use transaction::*;

use parity_scale_codec::{Decode, Encode};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A fixed-size, 32-byte hash digest.
pub type Hash256 = [u8; 32];

/// A fixed-size, 32-byte validator identifier (the Keccak-256 digest of the
/// validator's uncompressed public key; the account address is its last
/// 20 bytes).
pub type ValidatorId = [u8; 32];

/// A 20-byte account identifier, derived from a public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Encode, Decode)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// The all-zero address.
    pub const ZERO: Address = Address([0u8; 20]);

    /// Returns the raw address bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Extracts the address embedded in a 32-byte validator identifier
    /// (its last 20 bytes).
    pub fn from_validator_id(id: &ValidatorId) -> Self {
        let mut out = [0u8; 20];
        out.copy_from_slice(&id[12..32]);
        Address(out)
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| format!("invalid address hex: {}", e))?;
        if bytes.len() != 20 {
            return Err(format!(
                "invalid address length: expected 20 bytes, got {}",
                bytes.len()
            ));
        }
        let mut out = [0u8; 20];
        out.copy_from_slice(&bytes);
        Ok(Address(out))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// Account state in the chain's world state.
///
/// Ethereum-style account model. An account is *empty* iff every field is
/// zero; empty accounts are never materialized and are excluded from the
/// state root.
#[derive(Debug, Clone, PartialEq, Eq, Default, Encode, Decode)]
pub struct Account {
    /// Number of transactions sent from this account.
    pub nonce: u64,
    /// Account balance in the smallest unit.
    pub balance: u128,
    /// Merkle root of contract storage (contracts only).
    pub storage_root: Hash256,
    /// Hash of contract code (contracts only).
    pub code_hash: Hash256,
}

impl Account {
    /// Creates an account holding only a balance.
    pub fn with_balance(balance: u128) -> Self {
        Account {
            balance,
            ..Default::default()
        }
    }

    /// Returns true if the account has no state at all.
    pub fn is_empty(&self) -> bool {
        self.nonce == 0
            && self.balance == 0
            && self.storage_root == [0u8; 32]
            && self.code_hash == [0u8; 32]
    }
}

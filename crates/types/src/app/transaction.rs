//! The transaction sum type and its variants.
//!
//! The chain processes two families of transactions: value transfers
//! (including contract creation, whose constructor execution is out of
//! scope) and staking operations. They are expressed as a tagged sum type;
//! the validator dispatches on the tag. All hash preimages are canonical
//! SCALE encodings of the signed fields, excluding the signature itself.

use crate::app::{Address, Hash256};
use parity_scale_codec::{Decode, Encode};
use sha2::{Digest, Sha256};

/// Base gas charged for every value-transfer transaction.
pub const TX_BASE_GAS: u64 = 21_000;
/// Additional gas charged for contract creation.
pub const TX_CREATE_GAS: u64 = 32_000;
/// Gas per zero byte of transaction data.
pub const TX_DATA_ZERO_GAS: u64 = 4;
/// Gas per non-zero byte of transaction data.
pub const TX_DATA_NONZERO_GAS: u64 = 16;
/// Flat intrinsic gas for staking operations.
pub const STAKING_GAS: u64 = 50_000;

/// A value-transfer (or contract-creation) transaction.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Transaction {
    /// Transaction sequence number for the sender.
    pub nonce: u64,
    /// Sender address.
    pub from: Address,
    /// Recipient address, or `None` for contract creation.
    pub to: Option<Address>,
    /// Amount to transfer, in the smallest unit.
    pub value: u128,
    /// Price per unit of gas.
    pub gas_price: u64,
    /// Maximum gas allowed for this transaction.
    pub gas_limit: u64,
    /// Arbitrary data payload (contract init code or task data).
    pub data: Vec<u8>,
    /// Signature recovery id.
    pub v: u8,
    /// First half of the ECDSA signature.
    pub r: Hash256,
    /// Second half of the ECDSA signature.
    pub s: Hash256,
}

impl Transaction {
    /// Creates an unsigned transfer.
    pub fn transfer(
        nonce: u64,
        from: Address,
        to: Address,
        value: u128,
        gas_price: u64,
        gas_limit: u64,
    ) -> Self {
        Transaction {
            nonce,
            from,
            to: Some(to),
            value,
            gas_price,
            gas_limit,
            data: Vec::new(),
            v: 0,
            r: [0u8; 32],
            s: [0u8; 32],
        }
    }

    /// Returns true if this transaction creates a contract (`to` is empty).
    pub fn is_contract_creation(&self) -> bool {
        self.to.is_none()
    }

    /// The canonical signing preimage: every field except the signature.
    pub fn signing_preimage(&self) -> Vec<u8> {
        crate::codec::to_bytes_canonical(&(
            self.nonce,
            &self.from,
            &self.to,
            self.value,
            self.gas_price,
            self.gas_limit,
            &self.data,
        ))
    }

    /// The canonical transaction hash: SHA-256 of the signing preimage.
    pub fn hash(&self) -> Hash256 {
        Sha256::digest(self.signing_preimage()).into()
    }

    /// Intrinsic gas charged before any execution.
    pub fn intrinsic_gas(&self) -> u64 {
        let mut gas = TX_BASE_GAS;
        if self.is_contract_creation() {
            gas += TX_CREATE_GAS;
        }
        for byte in &self.data {
            gas += if *byte == 0 {
                TX_DATA_ZERO_GAS
            } else {
                TX_DATA_NONZERO_GAS
            };
        }
        gas
    }
}

/// The staking operation requested by a [`StakingTransaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum StakingKind {
    /// Bond tokens to a validator, registering it on first use.
    Stake,
    /// Unbond previously staked tokens.
    Unstake,
    /// Move all pending rewards into the validator's balance.
    ClaimRewards,
}

/// A staking transaction (stake, unstake, or claim rewards).
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct StakingTransaction {
    /// The staking operation.
    pub kind: StakingKind,
    /// Transaction sequence number for the sender.
    pub nonce: u64,
    /// Staker address.
    pub from: Address,
    /// Validator address (may equal `from`).
    pub validator: Address,
    /// Amount to stake or unstake; zero for reward claims.
    pub amount: u128,
    /// Price per unit of gas.
    pub gas_price: u64,
    /// Maximum gas allowed.
    pub gas_limit: u64,
    /// Validator identity key, required for `Stake`.
    pub public_key: Hash256,
    /// Signature recovery id.
    pub v: u8,
    /// First half of the ECDSA signature.
    pub r: Hash256,
    /// Second half of the ECDSA signature.
    pub s: Hash256,
}

impl StakingTransaction {
    /// The canonical signing preimage: every field except the signature.
    pub fn signing_preimage(&self) -> Vec<u8> {
        crate::codec::to_bytes_canonical(&(
            &self.kind,
            self.nonce,
            &self.from,
            &self.validator,
            self.amount,
            self.gas_price,
            self.gas_limit,
            &self.public_key,
        ))
    }

    /// The canonical transaction hash: SHA-256 of the signing preimage.
    pub fn hash(&self) -> Hash256 {
        Sha256::digest(self.signing_preimage()).into()
    }

    /// Intrinsic gas charged before any execution.
    pub fn intrinsic_gas(&self) -> u64 {
        STAKING_GAS
    }
}

/// A top-level sum of every transaction the chain can process.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum ChainTransaction {
    /// Value transfer or contract creation.
    Transfer(Transaction),
    /// Stake, unstake, or reward claim.
    Staking(StakingTransaction),
}

impl ChainTransaction {
    /// The canonical transaction hash of the inner variant.
    pub fn hash(&self) -> Hash256 {
        match self {
            ChainTransaction::Transfer(tx) => tx.hash(),
            ChainTransaction::Staking(tx) => tx.hash(),
        }
    }

    /// The canonical signing preimage of the inner variant.
    pub fn signing_preimage(&self) -> Vec<u8> {
        match self {
            ChainTransaction::Transfer(tx) => tx.signing_preimage(),
            ChainTransaction::Staking(tx) => tx.signing_preimage(),
        }
    }

    /// Sender address.
    pub fn from(&self) -> Address {
        match self {
            ChainTransaction::Transfer(tx) => tx.from,
            ChainTransaction::Staking(tx) => tx.from,
        }
    }

    /// Sender nonce.
    pub fn nonce(&self) -> u64 {
        match self {
            ChainTransaction::Transfer(tx) => tx.nonce,
            ChainTransaction::Staking(tx) => tx.nonce,
        }
    }

    /// Gas price offered by the sender.
    pub fn gas_price(&self) -> u64 {
        match self {
            ChainTransaction::Transfer(tx) => tx.gas_price,
            ChainTransaction::Staking(tx) => tx.gas_price,
        }
    }

    /// Gas limit set by the sender.
    pub fn gas_limit(&self) -> u64 {
        match self {
            ChainTransaction::Transfer(tx) => tx.gas_limit,
            ChainTransaction::Staking(tx) => tx.gas_limit,
        }
    }

    /// Intrinsic gas of the inner variant.
    pub fn intrinsic_gas(&self) -> u64 {
        match self {
            ChainTransaction::Transfer(tx) => tx.intrinsic_gas(),
            ChainTransaction::Staking(tx) => tx.intrinsic_gas(),
        }
    }

    /// The `(v, r, s)` signature triple.
    pub fn signature(&self) -> (u8, Hash256, Hash256) {
        match self {
            ChainTransaction::Transfer(tx) => (tx.v, tx.r, tx.s),
            ChainTransaction::Staking(tx) => (tx.v, tx.r, tx.s),
        }
    }

    /// Fills the `(v, r, s)` signature fields.
    pub fn set_signature(&mut self, v: u8, r: Hash256, s: Hash256) {
        match self {
            ChainTransaction::Transfer(tx) => {
                tx.v = v;
                tx.r = r;
                tx.s = s;
            }
            ChainTransaction::Staking(tx) => {
                tx.v = v;
                tx.r = r;
                tx.s = s;
            }
        }
    }
}

/// Derives a contract address from the creator and its nonce: the last 20
/// bytes of `sha256(sender || nonce_be)`.
pub fn contract_address(sender: &Address, nonce: u64) -> Address {
    let mut data = Vec::with_capacity(28);
    data.extend_from_slice(sender.as_bytes());
    data.extend_from_slice(&nonce.to_be_bytes());
    let digest: Hash256 = Sha256::digest(&data).into();
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest[12..32]);
    Address(out)
}

//! Execution receipts.

use crate::app::{Address, Hash256};
use parity_scale_codec::{Decode, Encode};
use sha2::{Digest, Sha256};

/// Execution succeeded.
pub const RECEIPT_SUCCESS: u8 = 1;
/// Execution failed; only the nonce bump and the intrinsic-gas charge
/// remain in state.
pub const RECEIPT_FAILURE: u8 = 0;

/// Receipt generated after executing a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Receipt {
    /// Hash of the executed transaction.
    pub tx_hash: Hash256,
    /// Hash of the block containing the transaction.
    pub block_hash: Hash256,
    /// Height of the containing block.
    pub block_height: u64,
    /// Position in the block's transaction list.
    pub tx_index: u32,
    /// Sender address.
    pub from: Address,
    /// Recipient address, absent for contract creation.
    pub to: Option<Address>,
    /// Address of the created contract, if any.
    pub contract_address: Option<Address>,
    /// Actual gas consumed.
    pub gas_used: u64,
    /// `RECEIPT_SUCCESS` or `RECEIPT_FAILURE`.
    pub status: u8,
    /// Log entries emitted during execution.
    pub logs: Vec<Vec<u8>>,
}

impl Receipt {
    /// Returns true if the transaction executed successfully.
    pub fn succeeded(&self) -> bool {
        self.status == RECEIPT_SUCCESS
    }

    /// The canonical receipt hash used for the receipts root.
    ///
    /// Excludes `block_hash`: the containing block's hash is not known
    /// until the header is sealed, and the header already commits to the
    /// receipts root.
    pub fn hash(&self) -> Hash256 {
        let preimage = crate::codec::to_bytes_canonical(&(
            &self.tx_hash,
            self.block_height,
            self.tx_index,
            &self.from,
            &self.to,
            &self.contract_address,
            self.gas_used,
            self.status,
            &self.logs,
        ));
        Sha256::digest(preimage).into()
    }
}

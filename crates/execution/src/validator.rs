//! The block validator and transaction executor.
//!
//! Transaction execution runs inside a state snapshot. The upfront gas
//! charge is taken first; any later failure rolls back to the snapshot,
//! re-applies the nonce bump and the intrinsic-gas charge, and emits a
//! failed receipt. Block execution applies every transaction in order,
//! commits the state, and hands back receipts plus the new state root.

use axon_crypto::{verify_header_signature, verify_transaction, Keypair, MerkleTree};
use axon_state::StateStore;
use axon_types::app::{
    contract_address, Block, BlockHeader, ChainTransaction, Hash256, Receipt, StakingKind,
    ValidatorId, BLOCK_VERSION, RECEIPT_FAILURE, RECEIPT_SUCCESS,
};
use axon_types::config::ChainConfig;
use axon_types::error::{BlockError, TransactionError};
use tracing::{debug, warn};

/// The result of executing a block's transactions.
#[derive(Debug)]
pub struct BlockOutcome {
    /// One receipt per transaction, in block order.
    pub receipts: Vec<Receipt>,
    /// The state root after committing the block.
    pub state_root: Hash256,
    /// Total gas consumed.
    pub gas_used: u64,
}

/// Validates blocks and transactions according to consensus rules, and
/// executes them against the state store.
#[derive(Debug, Clone)]
pub struct BlockValidator {
    config: ChainConfig,
}

impl BlockValidator {
    /// Creates a validator for the given chain configuration.
    pub fn new(config: ChainConfig) -> Self {
        BlockValidator { config }
    }

    /// The chain configuration this validator enforces.
    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Validates a header against its parent and, when supplied, the
    /// slot's elected validator. `now` is the local wall-clock time in
    /// seconds, used for the future-skew bound.
    pub fn validate_header(
        &self,
        header: &BlockHeader,
        parent: Option<&BlockHeader>,
        now: u64,
        expected_validator: Option<&ValidatorId>,
    ) -> Result<(), BlockError> {
        if let Some(parent) = parent {
            let parent_hash = parent.hash();
            if header.previous_hash != parent_hash {
                return Err(BlockError::InvalidParent {
                    expected: hex::encode(parent_hash),
                    got: hex::encode(header.previous_hash),
                });
            }
            if header.height != parent.height + 1 {
                return Err(BlockError::InvalidHeight {
                    expected: parent.height + 1,
                    got: header.height,
                });
            }
            if header.timestamp <= parent.timestamp
                || header.timestamp > now + self.config.max_clock_skew
            {
                return Err(BlockError::InvalidTimestamp {
                    timestamp: header.timestamp,
                    parent_timestamp: parent.timestamp,
                    max_skew: self.config.max_clock_skew,
                });
            }
        }

        if let Some(expected) = expected_validator {
            if &header.validator != expected {
                return Err(BlockError::InvalidValidator(format!(
                    "expected producer {}, got {}",
                    hex::encode(expected),
                    hex::encode(header.validator)
                )));
            }
            if !verify_header_signature(&header.signing_preimage(), &header.signature, expected) {
                return Err(BlockError::InvalidValidator(
                    "producer signature does not verify".into(),
                ));
            }
        }
        Ok(())
    }

    /// Validates a single transaction against the current state.
    pub fn validate_transaction(
        &self,
        tx: &ChainTransaction,
        state: &StateStore,
    ) -> Result<(), TransactionError> {
        verify_transaction(tx)?;

        let from = tx.from();
        let account_nonce = state.get_nonce(&from);
        if tx.nonce() != account_nonce {
            return Err(TransactionError::NonceMismatch {
                expected: account_nonce,
                got: tx.nonce(),
            });
        }

        let intrinsic = tx.intrinsic_gas();
        if tx.gas_limit() < intrinsic {
            return Err(TransactionError::GasLimitBelowIntrinsic {
                gas_limit: tx.gas_limit(),
                intrinsic,
            });
        }
        if tx.gas_limit() > self.config.block_gas_limit {
            return Err(TransactionError::GasLimitAboveBlock {
                gas_limit: tx.gas_limit(),
                block_gas_limit: self.config.block_gas_limit,
            });
        }
        if tx.gas_price() < self.config.min_gas_price {
            return Err(TransactionError::GasPriceTooLow {
                gas_price: tx.gas_price(),
                min_gas_price: self.config.min_gas_price,
            });
        }

        let value = match tx {
            ChainTransaction::Transfer(t) => t.value,
            ChainTransaction::Staking(t) => match t.kind {
                StakingKind::Stake => t.amount,
                _ => 0,
            },
        };
        let max_cost = value + tx.gas_limit() as u128 * tx.gas_price() as u128;
        let available = state.get_balance(&from);
        if available < max_cost {
            return Err(TransactionError::InsufficientBalance {
                required: max_cost,
                available,
            });
        }

        if let ChainTransaction::Staking(t) = tx {
            if t.kind == StakingKind::Stake && t.public_key == [0u8; 32] {
                return Err(TransactionError::MissingPublicKey);
            }
        }
        Ok(())
    }

    /// Executes a transaction inside a state snapshot and emits a receipt.
    ///
    /// The transaction must already have passed validation. Any failure
    /// after the upfront gas charge leaves only the nonce bump and the
    /// intrinsic-gas charge in state.
    pub fn execute_transaction(
        &self,
        tx: &ChainTransaction,
        state: &mut StateStore,
        block_height: u64,
        block_hash: Hash256,
        tx_index: u32,
    ) -> Receipt {
        let from = tx.from();
        let (to, contract) = match tx {
            ChainTransaction::Transfer(t) => (t.to, None::<axon_types::app::Address>),
            ChainTransaction::Staking(t) => (Some(t.validator), None),
        };
        let mut receipt = Receipt {
            tx_hash: tx.hash(),
            block_hash,
            block_height,
            tx_index,
            from,
            to,
            contract_address: contract,
            gas_used: 0,
            status: RECEIPT_FAILURE,
            logs: Vec::new(),
        };

        let snapshot = state.snapshot();
        let gas_price = tx.gas_price() as u128;
        let intrinsic = tx.intrinsic_gas();
        let upfront = tx.gas_limit() as u128 * gas_price;

        // 1. Upfront gas charge. Validation guarantees coverage, so a
        // failure here means the receipt fails without touching state.
        if state.sub_balance(&from, upfront).is_err() {
            receipt.gas_used = intrinsic;
            return receipt;
        }

        // 2. Replay protection advances regardless of the outcome.
        state.increment_nonce(&from);

        let result = self.apply_operation(tx, state, &mut receipt);
        match result {
            Ok(()) => {
                // Intrinsic gas only: there is no VM to meter.
                receipt.gas_used = intrinsic;
                receipt.status = RECEIPT_SUCCESS;
                let refund = (tx.gas_limit() - intrinsic) as u128 * gas_price;
                if let Err(e) = state.add_balance(&from, refund) {
                    warn!(target: "execution", tx = %hex::encode(receipt.tx_hash), "gas refund failed: {}", e);
                }
            }
            Err(e) => {
                debug!(
                    target: "execution",
                    tx = %hex::encode(receipt.tx_hash),
                    "transaction failed: {}", e
                );
                // Roll back everything, then keep the replay bump and the
                // intrinsic-gas charge.
                if state.rollback_to(snapshot).is_err() {
                    warn!(target: "execution", "snapshot rollback failed");
                }
                let _ = state.sub_balance(&from, intrinsic as u128 * gas_price);
                state.increment_nonce(&from);
                receipt.gas_used = intrinsic;
                receipt.status = RECEIPT_FAILURE;
                receipt.contract_address = None;
            }
        }
        receipt
    }

    fn apply_operation(
        &self,
        tx: &ChainTransaction,
        state: &mut StateStore,
        receipt: &mut Receipt,
    ) -> Result<(), TransactionError> {
        match tx {
            ChainTransaction::Transfer(t) => {
                let destination = match t.to {
                    Some(to) => to,
                    None => {
                        // Contract creation: derive the address from the
                        // sender and its pre-execution nonce.
                        let created = contract_address(&t.from, t.nonce);
                        state.set_code(&created, t.data.clone());
                        receipt.contract_address = Some(created);
                        created
                    }
                };
                if t.value > 0 {
                    state.transfer(&t.from, &destination, t.value)?;
                }
                Ok(())
            }
            ChainTransaction::Staking(t) => match t.kind {
                StakingKind::Stake => {
                    state.sub_balance(&t.from, t.amount)?;
                    state.add_stake(&t.validator, t.amount)?;
                    state.set_validator_meta(t.validator, t.public_key, true);
                    Ok(())
                }
                StakingKind::Unstake => {
                    state.sub_stake(&t.validator, t.amount)?;
                    state.add_balance(&t.from, t.amount)?;
                    Ok(())
                }
                StakingKind::ClaimRewards => {
                    let claimed = state.claim_rewards(&t.validator)?;
                    if claimed == 0 {
                        return Err(TransactionError::NoPendingRewards);
                    }
                    Ok(())
                }
            },
        }
    }

    /// Fully validates and executes a received block against the current
    /// state: per-transaction validation, gas accounting, transaction
    /// root, execution, and the state-root check. Commits on success.
    pub fn execute_block(
        &self,
        block: &Block,
        state: &mut StateStore,
    ) -> Result<BlockOutcome, BlockError> {
        block.validate_structure()?;

        let block_hash = block.hash();
        let mut receipts = Vec::with_capacity(block.transactions.len());
        let mut gas_used: u64 = 0;

        let snapshot = state.snapshot();
        for (index, tx) in block.transactions.iter().enumerate() {
            if let Err(source) = self.validate_transaction(tx, state) {
                // Unwind everything the earlier transactions did.
                let _ = state.rollback_to(snapshot);
                warn!(
                    target: "execution",
                    height = block.header.height,
                    index,
                    "block contains invalid transaction: {}", source
                );
                return Err(BlockError::InvalidTransaction { index, source });
            }
            let receipt = self.execute_transaction(
                tx,
                state,
                block.header.height,
                block_hash,
                index as u32,
            );
            gas_used += receipt.gas_used;
            receipts.push(receipt);
        }

        if gas_used > block.header.gas_limit {
            let _ = state.rollback_to(snapshot);
            return Err(BlockError::GasLimitExceeded {
                gas_used,
                gas_limit: block.header.gas_limit,
            });
        }
        if gas_used != block.header.gas_used {
            let _ = state.rollback_to(snapshot);
            return Err(BlockError::GasUsedMismatch {
                header: block.header.gas_used,
                computed: gas_used,
            });
        }

        let txs_root = MerkleTree::from_transactions(&block.transactions).root();
        if txs_root != block.header.txs_root {
            let _ = state.rollback_to(snapshot);
            return Err(BlockError::InvalidTxsRoot);
        }

        let state_root = state.state_root();
        if state_root != block.header.state_root {
            let _ = state.rollback_to(snapshot);
            return Err(BlockError::InvalidStateRoot {
                expected: hex::encode(block.header.state_root),
                got: hex::encode(state_root),
            });
        }

        let committed_root = state.commit();
        debug!(
            target: "execution",
            height = block.header.height,
            txs = receipts.len(),
            gas_used,
            "block executed"
        );
        Ok(BlockOutcome {
            receipts,
            state_root: committed_root,
            gas_used,
        })
    }

    /// Builds, executes, and signs a new block on top of `parent`.
    ///
    /// Transactions that fail validation at this point are dropped with a
    /// warning; the remainder execute against the live state, which is
    /// committed. Used by the elected slot leader.
    pub fn build_block(
        &self,
        transactions: Vec<ChainTransaction>,
        parent: &BlockHeader,
        state: &mut StateStore,
        keypair: &Keypair,
        timestamp: u64,
    ) -> Result<(Block, Vec<Receipt>), BlockError> {
        let height = parent.height + 1;
        let mut included = Vec::with_capacity(transactions.len());
        let mut receipts = Vec::with_capacity(transactions.len());
        let mut gas_used: u64 = 0;

        for tx in transactions {
            if let Err(e) = self.validate_transaction(&tx, state) {
                warn!(target: "execution", height, "dropping invalid transaction from block: {}", e);
                continue;
            }
            if gas_used + tx.intrinsic_gas() > self.config.block_gas_limit {
                continue;
            }
            let receipt = self.execute_transaction(
                &tx,
                state,
                height,
                [0u8; 32],
                included.len() as u32,
            );
            gas_used += receipt.gas_used;
            receipts.push(receipt);
            included.push(tx);
        }

        let txs_root = MerkleTree::from_transactions(&included).root();
        let receipts_root =
            MerkleTree::new(receipts.iter().map(|r| r.hash()).collect::<Vec<_>>()).root();
        let state_root = state.commit();

        let mut header = BlockHeader {
            version: BLOCK_VERSION,
            height,
            timestamp,
            previous_hash: parent.hash(),
            state_root,
            txs_root,
            receipts_root,
            validator: keypair.validator_id(),
            signature: [0u8; 64],
            gas_used,
            gas_limit: self.config.block_gas_limit,
            extra_data: Vec::new(),
        };

        let signature = keypair
            .sign(&header.signing_preimage())
            .map_err(|e| BlockError::InvalidValidator(e.to_string()))?;
        let (sig64, _v) = signature.split_at(64);
        header.signature.copy_from_slice(sig64);

        let block = Block {
            header,
            transactions: included,
        };
        let block_hash = block.hash();
        for receipt in &mut receipts {
            receipt.block_hash = block_hash;
        }
        Ok((block, receipts))
    }
}

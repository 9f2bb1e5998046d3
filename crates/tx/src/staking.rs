//! Builders that pre-validate and sign transactions.
//!
//! The builder checks what it can against the latest state before signing:
//! balances against amount plus maximum gas cost, bonded stake for
//! unbonds, pending rewards for claims. Full validation still happens at
//! execution time; these checks only keep obviously doomed transactions
//! out of the network.

use axon_crypto::{sign_transaction, Keypair};
use axon_state::StateStore;
use axon_types::app::{
    Address, ChainTransaction, Hash256, StakingKind, StakingTransaction, Transaction,
};
use axon_types::error::TransactionError;
use tracing::info;

/// Default gas price used by the builder when the caller does not care.
pub const DEFAULT_GAS_PRICE: u64 = 1_000;
/// Default gas limit for staking operations.
pub const DEFAULT_STAKING_GAS_LIMIT: u64 = 100_000;

/// Assembles signed transactions against a state view.
pub struct TxBuilder<'a> {
    state: &'a StateStore,
}

impl<'a> TxBuilder<'a> {
    /// Creates a builder reading balances and stakes from `state`.
    pub fn new(state: &'a StateStore) -> Self {
        TxBuilder { state }
    }

    /// Builds and signs a value transfer.
    pub fn transfer(
        &self,
        keypair: &Keypair,
        to: Address,
        value: u128,
        gas_price: u64,
        gas_limit: u64,
    ) -> Result<ChainTransaction, TransactionError> {
        let from = keypair.address();
        let nonce = self.state.get_nonce(&from);
        let max_cost = value + gas_limit as u128 * gas_price as u128;
        let available = self.state.get_balance(&from);
        if available < max_cost {
            return Err(TransactionError::InsufficientBalance {
                required: max_cost,
                available,
            });
        }
        let mut tx = ChainTransaction::Transfer(Transaction::transfer(
            nonce, from, to, value, gas_price, gas_limit,
        ));
        sign_transaction(&mut tx, keypair)?;
        Ok(tx)
    }

    /// Builds and signs a stake transaction bonding `amount` to
    /// `validator` under identity key `public_key`.
    pub fn stake(
        &self,
        keypair: &Keypair,
        validator: Address,
        amount: u128,
        public_key: Hash256,
    ) -> Result<ChainTransaction, TransactionError> {
        if public_key == [0u8; 32] {
            return Err(TransactionError::MissingPublicKey);
        }
        let from = keypair.address();
        let available = self.state.get_balance(&from);
        let max_cost =
            amount + DEFAULT_STAKING_GAS_LIMIT as u128 * DEFAULT_GAS_PRICE as u128;
        if available < max_cost {
            return Err(TransactionError::InsufficientBalance {
                required: max_cost,
                available,
            });
        }
        let mut tx = self.staking_tx(keypair, StakingKind::Stake, validator, amount, public_key);
        sign_transaction(&mut tx, keypair)?;
        info!(target: "staking", %validator, amount, "built stake transaction");
        Ok(tx)
    }

    /// Builds and signs an unstake transaction.
    pub fn unstake(
        &self,
        keypair: &Keypair,
        validator: Address,
        amount: u128,
    ) -> Result<ChainTransaction, TransactionError> {
        let bonded = self.state.get_stake(&validator);
        if bonded < amount {
            return Err(TransactionError::InsufficientStake {
                required: amount,
                bonded,
            });
        }
        let from = keypair.address();
        let gas_cost = DEFAULT_STAKING_GAS_LIMIT as u128 * DEFAULT_GAS_PRICE as u128;
        let available = self.state.get_balance(&from);
        if available < gas_cost {
            return Err(TransactionError::InsufficientBalance {
                required: gas_cost,
                available,
            });
        }
        let mut tx = self.staking_tx(keypair, StakingKind::Unstake, validator, amount, [0u8; 32]);
        sign_transaction(&mut tx, keypair)?;
        Ok(tx)
    }

    /// Builds and signs a reward claim.
    pub fn claim_rewards(
        &self,
        keypair: &Keypair,
        validator: Address,
    ) -> Result<ChainTransaction, TransactionError> {
        if self.state.get_pending_rewards(&validator) == 0 {
            return Err(TransactionError::NoPendingRewards);
        }
        let mut tx = self.staking_tx(keypair, StakingKind::ClaimRewards, validator, 0, [0u8; 32]);
        sign_transaction(&mut tx, keypair)?;
        Ok(tx)
    }

    fn staking_tx(
        &self,
        keypair: &Keypair,
        kind: StakingKind,
        validator: Address,
        amount: u128,
        public_key: Hash256,
    ) -> ChainTransaction {
        let from = keypair.address();
        ChainTransaction::Staking(StakingTransaction {
            kind,
            nonce: self.state.get_nonce(&from),
            from,
            validator,
            amount,
            gas_price: DEFAULT_GAS_PRICE,
            gas_limit: DEFAULT_STAKING_GAS_LIMIT,
            public_key,
            v: 0,
            r: [0u8; 32],
            s: [0u8; 32],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axon_crypto::verify_transaction;

    fn funded_state(keypair: &Keypair, balance: u128) -> StateStore {
        let mut state = StateStore::new();
        state.add_balance(&keypair.address(), balance).unwrap();
        state
    }

    #[test]
    fn transfer_builder_signs_valid_tx() {
        let keypair = Keypair::generate();
        let state = funded_state(&keypair, 10_000_000);
        let tx = TxBuilder::new(&state)
            .transfer(&keypair, Address([2u8; 20]), 1_000, 1, 21_000)
            .unwrap();
        verify_transaction(&tx).unwrap();
        assert_eq!(tx.nonce(), 0);
    }

    #[test]
    fn transfer_builder_rejects_underfunded_sender() {
        let keypair = Keypair::generate();
        let state = funded_state(&keypair, 100);
        assert!(matches!(
            TxBuilder::new(&state).transfer(&keypair, Address([2u8; 20]), 1_000, 1, 21_000),
            Err(TransactionError::InsufficientBalance { .. })
        ));
    }

    #[test]
    fn stake_builder_requires_public_key() {
        let keypair = Keypair::generate();
        let state = funded_state(&keypair, u128::MAX / 2);
        assert!(matches!(
            TxBuilder::new(&state).stake(&keypair, keypair.address(), 100, [0u8; 32]),
            Err(TransactionError::MissingPublicKey)
        ));
    }

    #[test]
    fn unstake_builder_checks_bonded_amount() {
        let keypair = Keypair::generate();
        let state = funded_state(&keypair, u128::MAX / 2);
        assert!(matches!(
            TxBuilder::new(&state).unstake(&keypair, keypair.address(), 100),
            Err(TransactionError::InsufficientStake { .. })
        ));
    }

    #[test]
    fn claim_builder_requires_pending_rewards() {
        let keypair = Keypair::generate();
        let state = funded_state(&keypair, u128::MAX / 2);
        assert!(matches!(
            TxBuilder::new(&state).claim_rewards(&keypair, keypair.address()),
            Err(TransactionError::NoPendingRewards)
        ));
    }

    #[test]
    fn staking_builder_produces_verifiable_tx() {
        let keypair = Keypair::generate();
        let mut state = funded_state(&keypair, u128::MAX / 2);
        state.add_stake(&keypair.address(), 500).unwrap();
        let tx = TxBuilder::new(&state)
            .unstake(&keypair, keypair.address(), 100)
            .unwrap();
        verify_transaction(&tx).unwrap();
        assert!(matches!(
            tx,
            ChainTransaction::Staking(StakingTransaction {
                kind: StakingKind::Unstake,
                ..
            })
        ));
    }
}

//! The state store implementation.
//!
//! Writes land in a staged overlay and become part of the persisted root on
//! `commit`. Snapshots capture the full store (committed plus staged) and
//! form a stack; rolling back to a snapshot discards it and everything
//! above it. Overlay namespaces are kept separate from accounts rather
//! than piggybacking on the account shape.

use axon_crypto::{keccak256, sha256};
use axon_types::app::{Account, Address, Hash256, ValidatorMeta};
use axon_types::codec;
use axon_types::error::StateError;
use std::collections::BTreeMap;

/// Namespace tags mixed into the state-root preimage, one per overlay.
const NS_ACCOUNT: u8 = 0x00;
const NS_STAKE: u8 = 0x01;
const NS_REWARD: u8 = 0x02;
const NS_VALIDATOR_META: u8 = 0x03;
const NS_CODE: u8 = 0x04;

/// The full world state: accounts plus overlay namespaces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct WorldState {
    accounts: BTreeMap<Address, Account>,
    stakes: BTreeMap<Address, u128>,
    rewards: BTreeMap<Address, u128>,
    validator_meta: BTreeMap<Address, ValidatorMeta>,
    contract_code: BTreeMap<Address, Vec<u8>>,
}

impl WorldState {
    fn merge_from(&mut self, staged: WorldState) {
        self.accounts.extend(staged.accounts);
        self.stakes.extend(staged.stakes);
        self.rewards.extend(staged.rewards);
        self.validator_meta.extend(staged.validator_meta);
        self.contract_code.extend(staged.contract_code);
    }
}

/// Account-based state store with staged writes, snapshots, and a
/// deterministic root digest.
#[derive(Debug, Default)]
pub struct StateStore {
    committed: WorldState,
    staged: WorldState,
    snapshots: Vec<(WorldState, WorldState)>,
}

impl StateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        StateStore::default()
    }

    // ---- accounts ----

    /// Returns the account at `address`, or the empty account if it has
    /// never been materialized.
    pub fn get_account(&self, address: &Address) -> Account {
        self.staged
            .accounts
            .get(address)
            .or_else(|| self.committed.accounts.get(address))
            .cloned()
            .unwrap_or_default()
    }

    /// Stages an account write. Not visible to the persisted root until
    /// `commit`.
    pub fn set_account(&mut self, address: Address, account: Account) {
        self.staged.accounts.insert(address, account);
    }

    /// Returns the balance at `address`.
    pub fn get_balance(&self, address: &Address) -> u128 {
        self.get_account(address).balance
    }

    /// Returns the nonce at `address`.
    pub fn get_nonce(&self, address: &Address) -> u64 {
        self.get_account(address).nonce
    }

    /// Credits `amount` to `address`, materializing the account if needed.
    pub fn add_balance(&mut self, address: &Address, amount: u128) -> Result<(), StateError> {
        let mut account = self.get_account(address);
        account.balance = account
            .balance
            .checked_add(amount)
            .ok_or(StateError::BalanceOverflow(*address))?;
        self.set_account(*address, account);
        Ok(())
    }

    /// Debits `amount` from `address`; fails without touching state when
    /// the balance is insufficient.
    pub fn sub_balance(&mut self, address: &Address, amount: u128) -> Result<(), StateError> {
        let mut account = self.get_account(address);
        if account.balance < amount {
            return Err(StateError::InsufficientBalance {
                address: *address,
                required: amount,
                available: account.balance,
            });
        }
        account.balance -= amount;
        self.set_account(*address, account);
        Ok(())
    }

    /// Atomically moves `amount` from `from` to `to`. On failure the state
    /// is untouched.
    pub fn transfer(
        &mut self,
        from: &Address,
        to: &Address,
        amount: u128,
    ) -> Result<(), StateError> {
        // The debit checks the balance first, so a failure here leaves both
        // sides untouched.
        self.sub_balance(from, amount)?;
        self.add_balance(to, amount)
    }

    /// Increments the nonce at `address` by one.
    pub fn increment_nonce(&mut self, address: &Address) {
        let mut account = self.get_account(address);
        account.nonce += 1;
        self.set_account(*address, account);
    }

    /// Returns true when the account at `address` is materialized.
    pub fn exists(&self, address: &Address) -> bool {
        !self.get_account(address).is_empty()
    }

    // ---- contract code ----

    /// Stores `code` under `address` and stamps the account's code hash.
    pub fn set_code(&mut self, address: &Address, code: Vec<u8>) {
        let mut account = self.get_account(address);
        account.code_hash = if code.is_empty() {
            [0u8; 32]
        } else {
            keccak256(&code)
        };
        self.set_account(*address, account);
        if !code.is_empty() {
            self.staged.contract_code.insert(*address, code);
        }
    }

    /// Returns the contract code at `address`, empty if none.
    pub fn get_code(&self, address: &Address) -> Vec<u8> {
        self.staged
            .contract_code
            .get(address)
            .or_else(|| self.committed.contract_code.get(address))
            .cloned()
            .unwrap_or_default()
    }

    // ---- staking overlays ----

    /// Returns the bonded stake of `address`.
    pub fn get_stake(&self, address: &Address) -> u128 {
        self.staged
            .stakes
            .get(address)
            .or_else(|| self.committed.stakes.get(address))
            .copied()
            .unwrap_or(0)
    }

    /// Adds `amount` to the bonded stake of `address`.
    pub fn add_stake(&mut self, address: &Address, amount: u128) -> Result<(), StateError> {
        let stake = self
            .get_stake(address)
            .checked_add(amount)
            .ok_or(StateError::BalanceOverflow(*address))?;
        self.staged.stakes.insert(*address, stake);
        Ok(())
    }

    /// Removes `amount` from the bonded stake of `address`; fails without
    /// touching state when the bonded amount is insufficient.
    pub fn sub_stake(&mut self, address: &Address, amount: u128) -> Result<(), StateError> {
        let bonded = self.get_stake(address);
        if bonded < amount {
            return Err(StateError::InsufficientStake {
                address: *address,
                required: amount,
                bonded,
            });
        }
        self.staged.stakes.insert(*address, bonded - amount);
        Ok(())
    }

    /// Returns the claimable rewards of `address`.
    pub fn get_pending_rewards(&self, address: &Address) -> u128 {
        self.staged
            .rewards
            .get(address)
            .or_else(|| self.committed.rewards.get(address))
            .copied()
            .unwrap_or(0)
    }

    /// Adds `amount` to the claimable rewards of `address`.
    pub fn add_reward(&mut self, address: &Address, amount: u128) -> Result<(), StateError> {
        let rewards = self
            .get_pending_rewards(address)
            .checked_add(amount)
            .ok_or(StateError::BalanceOverflow(*address))?;
        self.staged.rewards.insert(*address, rewards);
        Ok(())
    }

    /// Atomically moves all pending rewards of `address` into its balance
    /// and zeroes the pending entry. Returns the amount claimed.
    pub fn claim_rewards(&mut self, address: &Address) -> Result<u128, StateError> {
        let rewards = self.get_pending_rewards(address);
        if rewards > 0 {
            self.add_balance(address, rewards)?;
            self.staged.rewards.insert(*address, 0);
        }
        Ok(rewards)
    }

    /// Records validator metadata for `address`.
    pub fn set_validator_meta(&mut self, address: Address, public_key: Hash256, active: bool) {
        self.staged
            .validator_meta
            .insert(address, ValidatorMeta { public_key, active });
    }

    /// Returns the validator metadata for `address`, if registered.
    pub fn get_validator_meta(&self, address: &Address) -> Option<ValidatorMeta> {
        self.staged
            .validator_meta
            .get(address)
            .or_else(|| self.committed.validator_meta.get(address))
            .cloned()
    }

    /// Iterates every registered validator with its metadata and current
    /// bonded stake, in address order. Used to rebuild the consensus
    /// registry after applying staking transactions.
    pub fn validator_entries(&self) -> Vec<(Address, ValidatorMeta, u128)> {
        let mut merged: BTreeMap<Address, ValidatorMeta> =
            self.committed.validator_meta.clone();
        merged.extend(self.staged.validator_meta.clone());
        merged
            .into_iter()
            .map(|(address, meta)| {
                let stake = self.get_stake(&address);
                (address, meta, stake)
            })
            .collect()
    }

    // ---- snapshots ----

    /// Captures the full current state (including staged writes) and
    /// returns a snapshot id. Snapshots nest.
    pub fn snapshot(&mut self) -> u64 {
        let id = self.snapshots.len() as u64;
        self.snapshots
            .push((self.committed.clone(), self.staged.clone()));
        id
    }

    /// Restores the state captured by snapshot `id` and discards it along
    /// with every later snapshot.
    pub fn rollback_to(&mut self, id: u64) -> Result<(), StateError> {
        let index = id as usize;
        if index >= self.snapshots.len() {
            return Err(StateError::UnknownSnapshot(id));
        }
        let (committed, staged) = self.snapshots.swap_remove(index);
        self.snapshots.truncate(index);
        self.committed = committed;
        self.staged = staged;
        Ok(())
    }

    /// Folds staged writes into the committed set and returns the new
    /// state root. Snapshots are scoped to a single block's execution, so
    /// committing also drops the snapshot stack.
    pub fn commit(&mut self) -> Hash256 {
        let staged = std::mem::take(&mut self.staged);
        self.committed.merge_from(staged);
        self.snapshots.clear();
        self.state_root()
    }

    // ---- root ----

    /// The deterministic state root: SHA-256 over the canonical encoding of
    /// every non-empty entry, sorted by namespace then address. Staged
    /// writes are included so execution can compare roots before commit.
    pub fn state_root(&self) -> Hash256 {
        let mut merged = self.committed.clone();
        merged.merge_from(self.staged.clone());

        let mut preimage: Vec<u8> = Vec::new();
        for (address, account) in &merged.accounts {
            if account.is_empty() {
                continue;
            }
            preimage.extend_from_slice(&codec::to_bytes_canonical(&(
                NS_ACCOUNT, address, account,
            )));
        }
        for (address, stake) in &merged.stakes {
            if *stake == 0 {
                continue;
            }
            preimage.extend_from_slice(&codec::to_bytes_canonical(&(NS_STAKE, address, stake)));
        }
        for (address, reward) in &merged.rewards {
            if *reward == 0 {
                continue;
            }
            preimage.extend_from_slice(&codec::to_bytes_canonical(&(NS_REWARD, address, reward)));
        }
        for (address, meta) in &merged.validator_meta {
            preimage.extend_from_slice(&codec::to_bytes_canonical(&(
                NS_VALIDATOR_META,
                address,
                meta,
            )));
        }
        for (address, code) in &merged.contract_code {
            if code.is_empty() {
                continue;
            }
            preimage.extend_from_slice(&codec::to_bytes_canonical(&(NS_CODE, address, code)));
        }

        if preimage.is_empty() {
            return [0u8; 32];
        }
        sha256(&preimage)
    }
}

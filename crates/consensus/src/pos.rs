//! The Proof-of-Stake engine.
//!
//! Time is divided into slots of `block_time` seconds; `epoch_length`
//! consecutive slots form an epoch. Each slot has exactly one elected
//! leader, chosen by a stake-weighted walk over the active set from a
//! deterministic per-slot seed, so every honest node agrees on the leader
//! without communication. Epoch boundaries redistribute rewards, apply
//! slashing, and rotate the active set.

use axon_crypto::{sha256, verify_header_signature};
use axon_state::StateStore;
use axon_types::app::{active_set_ordering, Address, BlockHeader, Validator, ValidatorId};
use axon_types::config::ConsensusParams;
use axon_types::error::ConsensusError;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// The validator registry and the epoch's active set.
#[derive(Debug, Default)]
pub struct ValidatorSet {
    validators: BTreeMap<Address, Validator>,
    /// Addresses in the current epoch's active set, in canonical order
    /// (descending stake, ties by address).
    active_set: Vec<Address>,
}

impl ValidatorSet {
    /// Creates an empty registry.
    pub fn new() -> Self {
        ValidatorSet::default()
    }

    /// Adds a validator or updates an existing one's stake and key.
    pub fn add_validator(&mut self, address: Address, public_key: ValidatorId, stake: u128) {
        match self.validators.get_mut(&address) {
            Some(existing) => {
                existing.stake = stake;
                existing.public_key = public_key;
                info!(target: "consensus", %address, stake, "updated validator");
            }
            None => {
                self.validators
                    .insert(address, Validator::new(address, public_key, stake));
                info!(target: "consensus", %address, stake, "registered validator");
            }
        }
    }

    /// Deactivates a validator and evicts it from the active set.
    pub fn remove_validator(&mut self, address: &Address) -> bool {
        let Some(validator) = self.validators.get_mut(address) else {
            return false;
        };
        validator.active = false;
        self.active_set.retain(|a| a != address);
        info!(target: "consensus", %address, "removed validator from active set");
        true
    }

    /// Jails a validator for misbehavior.
    pub fn jail_validator(&mut self, address: &Address) -> bool {
        self.remove_validator(address)
    }

    /// Returns the validator record for `address`.
    pub fn get_validator(&self, address: &Address) -> Option<&Validator> {
        self.validators.get(address)
    }

    /// Mutable access to a validator record.
    pub fn get_validator_mut(&mut self, address: &Address) -> Option<&mut Validator> {
        self.validators.get_mut(address)
    }

    /// Total stake bonded by the current active set.
    pub fn total_active_stake(&self) -> u128 {
        self.active_set
            .iter()
            .filter_map(|a| self.validators.get(a))
            .map(|v| v.stake)
            .sum()
    }

    /// The current active set in canonical order.
    pub fn active_validators(&self) -> Vec<&Validator> {
        self.active_set
            .iter()
            .filter_map(|a| self.validators.get(a))
            .collect()
    }

    /// Number of registered validators.
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// True when no validators are registered.
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Recomputes the active set: the top `count` non-jailed validators in
    /// canonical order.
    pub fn update_active_set(&mut self, count: usize) {
        let mut candidates: Vec<&Validator> =
            self.validators.values().filter(|v| v.active).collect();
        candidates.sort_by(|a, b| active_set_ordering(a, b));
        self.active_set = candidates
            .into_iter()
            .take(count)
            .map(|v| v.address)
            .collect();
    }
}

/// The Proof-of-Stake consensus engine.
#[derive(Debug)]
pub struct ProofOfStake {
    params: ConsensusParams,
    validator_set: ValidatorSet,
    current_epoch: u64,
    /// First signed header seen per (height, validator), for double-sign
    /// detection.
    seen_headers: BTreeMap<(u64, Address), [u8; 32]>,
}

impl ProofOfStake {
    /// Creates an engine with an empty registry.
    pub fn new(params: ConsensusParams) -> Self {
        ProofOfStake {
            params,
            validator_set: ValidatorSet::new(),
            current_epoch: 0,
            seen_headers: BTreeMap::new(),
        }
    }

    /// The consensus parameters.
    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    /// The validator registry.
    pub fn validator_set(&self) -> &ValidatorSet {
        &self.validator_set
    }

    /// Mutable access to the registry.
    pub fn validator_set_mut(&mut self) -> &mut ValidatorSet {
        &mut self.validator_set
    }

    /// The epoch most recently processed.
    pub fn current_epoch(&self) -> u64 {
        self.current_epoch
    }

    /// Rebuilds the registry from the on-chain staking state. Called after
    /// applying blocks that contain staking transactions.
    pub fn sync_from_state(&mut self, state: &StateStore) {
        for (address, meta, stake) in state.validator_entries() {
            if meta.active {
                self.validator_set.add_validator(address, meta.public_key, stake);
            } else if let Some(v) = self.validator_set.get_validator_mut(&address) {
                v.active = false;
            }
        }
        self.validator_set
            .update_active_set(self.params.validator_count);
    }

    /// Deterministic slot-leader selection.
    ///
    /// The seed defaults to the big-endian slot number; an external seed is
    /// reserved for a future VRF. The first 8 bytes of `sha256(seed)` read
    /// as a little-endian integer, reduced modulo the total active stake,
    /// pick a point on the stake line; the walk over the active set in
    /// canonical order returns the first validator whose cumulative stake
    /// exceeds that point.
    pub fn select_validator(
        &self,
        slot: u64,
        seed: Option<&[u8]>,
    ) -> Result<Address, ConsensusError> {
        let active = self.validator_set.active_validators();
        if active.is_empty() {
            return Err(ConsensusError::NoActiveValidators);
        }
        let total_stake: u128 = active.iter().map(|v| v.stake).sum();
        if total_stake == 0 {
            return Err(ConsensusError::ZeroTotalStake);
        }

        let slot_seed = slot.to_be_bytes();
        let digest = sha256(seed.unwrap_or(&slot_seed));
        let mut first8 = [0u8; 8];
        first8.copy_from_slice(digest.get(..8).unwrap_or(&[0u8; 8]));
        let selection_point = u64::from_le_bytes(first8) as u128 % total_stake;

        let mut cumulative: u128 = 0;
        for validator in &active {
            cumulative += validator.stake;
            if cumulative > selection_point {
                debug!(
                    target: "consensus",
                    slot,
                    leader = %validator.address,
                    stake = validator.stake,
                    total_stake,
                    "selected slot leader"
                );
                return Ok(validator.address);
            }
        }
        // Total stake is positive, so the walk always terminates above.
        Err(ConsensusError::ZeroTotalStake)
    }

    /// Checks that a block was produced and signed by the slot's elected
    /// validator.
    pub fn validate_block_producer(
        &self,
        header: &BlockHeader,
        slot: u64,
    ) -> Result<(), ConsensusError> {
        let expected = self.select_validator(slot, None)?;
        let got = Address::from_validator_id(&header.validator);
        if got != expected {
            warn!(
                target: "consensus",
                height = header.height,
                %expected,
                %got,
                "block producer mismatch"
            );
            return Err(ConsensusError::BlockProducerMismatch { expected, got });
        }
        if !verify_header_signature(&header.signing_preimage(), &header.signature, &header.validator)
        {
            return Err(ConsensusError::InvalidEvidence(
                "producer signature does not verify".into(),
            ));
        }
        Ok(())
    }

    /// Records a produced block for the producer's liveness accounting.
    pub fn record_produced(&mut self, address: &Address, height: u64) {
        if let Some(v) = self.validator_set.get_validator_mut(address) {
            v.last_block_height = height;
        }
    }

    /// Records a missed slot for the elected leader.
    pub fn record_missed(&mut self, address: &Address) {
        if let Some(v) = self.validator_set.get_validator_mut(address) {
            v.missed_blocks += 1;
        }
    }

    /// Observes a signed header for double-sign detection. Returns the
    /// conflicting hash when this producer already signed a different
    /// header at the same height.
    pub fn observe_header(&mut self, header: &BlockHeader) -> Option<[u8; 32]> {
        let producer = Address::from_validator_id(&header.validator);
        let hash = header.hash();
        match self.seen_headers.get(&(header.height, producer)) {
            Some(existing) if *existing != hash => Some(*existing),
            Some(_) => None,
            None => {
                self.seen_headers.insert((header.height, producer), hash);
                None
            }
        }
    }

    /// Applies double-sign evidence: two valid headers at the same height
    /// signed by the same validator. The offender is slashed at the
    /// double-sign rate and jailed immediately.
    pub fn report_double_sign(
        &mut self,
        a: &BlockHeader,
        b: &BlockHeader,
        state: &mut StateStore,
    ) -> Result<(), ConsensusError> {
        if a.height != b.height {
            return Err(ConsensusError::InvalidEvidence(
                "headers are at different heights".into(),
            ));
        }
        if a.validator != b.validator {
            return Err(ConsensusError::InvalidEvidence(
                "headers have different producers".into(),
            ));
        }
        if a.hash() == b.hash() {
            return Err(ConsensusError::InvalidEvidence(
                "headers are identical".into(),
            ));
        }
        for header in [a, b] {
            if !verify_header_signature(
                &header.signing_preimage(),
                &header.signature,
                &header.validator,
            ) {
                return Err(ConsensusError::InvalidEvidence(
                    "evidence signature does not verify".into(),
                ));
            }
        }

        let offender = Address::from_validator_id(&a.validator);
        let Some(validator) = self.validator_set.get_validator_mut(&offender) else {
            return Err(ConsensusError::InvalidEvidence(format!(
                "offender {} is not a registered validator",
                offender
            )));
        };
        let slash =
            validator.stake * self.params.double_sign_slash_percent as u128 / 100;
        validator.stake = validator.stake.saturating_sub(slash);
        if slash > 0 {
            let bonded = state.get_stake(&offender);
            state.sub_stake(&offender, slash.min(bonded))?;
        }
        warn!(
            target: "consensus",
            %offender,
            height = a.height,
            slash,
            "double signing detected, validator jailed"
        );
        self.validator_set.jail_validator(&offender);
        Ok(())
    }

    /// Processes an epoch boundary: distributes rewards, applies slashing,
    /// resets liveness counters, and rotates the active set.
    pub fn process_epoch(
        &mut self,
        epoch: u64,
        state: &mut StateStore,
    ) -> Result<(), ConsensusError> {
        info!(target: "consensus", epoch, "processing epoch boundary");
        self.distribute_rewards(state)?;
        self.process_slashing(state)?;
        for validator in self.validator_set.validators.values_mut() {
            validator.missed_blocks = 0;
        }
        self.validator_set
            .update_active_set(self.params.validator_count);
        self.current_epoch = epoch;
        // Evidence for past heights can be dropped once the epoch seals.
        let horizon = epoch.saturating_mul(self.params.epoch_length);
        self.seen_headers.retain(|(h, _), _| *h >= horizon);
        Ok(())
    }

    /// Splits the epoch's base reward by stake share, discounted by the
    /// validator's missed slots. All arithmetic is integral so every node
    /// computes identical rewards.
    fn distribute_rewards(&mut self, state: &mut StateStore) -> Result<(), ConsensusError> {
        let total_stake = self.validator_set.total_active_stake();
        if total_stake == 0 {
            return Ok(());
        }
        let epoch_length = self.params.epoch_length.max(1) as u128;
        let base = self.params.base_reward;

        let rewards: Vec<(Address, u128)> = self
            .validator_set
            .active_validators()
            .iter()
            .map(|v| {
                let produced = epoch_length.saturating_sub(v.missed_blocks as u128);
                let reward = base * v.stake / total_stake * produced / epoch_length;
                (v.address, reward)
            })
            .collect();

        for (address, reward) in rewards {
            if reward > 0 {
                state.add_reward(&address, reward)?;
                debug!(target: "consensus", %address, reward, "distributed epoch reward");
            }
        }
        Ok(())
    }

    /// Slashes validators that missed too many slots; jails any whose
    /// remaining stake falls under the minimum.
    fn process_slashing(&mut self, state: &mut StateStore) -> Result<(), ConsensusError> {
        let offenders: Vec<Address> = self
            .validator_set
            .validators
            .values()
            .filter(|v| v.active && v.missed_blocks >= self.params.max_missed_blocks)
            .map(|v| v.address)
            .collect();

        for address in offenders {
            let Some(validator) = self.validator_set.get_validator_mut(&address) else {
                continue;
            };
            let slash = validator.stake * self.params.slash_percent as u128 / 100;
            validator.stake = validator.stake.saturating_sub(slash);
            validator.missed_blocks = 0;
            let below_minimum = validator.stake < self.params.min_stake;
            if slash > 0 {
                let bonded = state.get_stake(&address);
                state.sub_stake(&address, slash.min(bonded))?;
            }
            warn!(target: "consensus", %address, slash, "slashed validator for missed blocks");
            if below_minimum {
                warn!(target: "consensus", %address, "stake below minimum, jailing");
                self.validator_set.jail_validator(&address);
            }
        }
        Ok(())
    }
}

//! Genesis configuration: loading, validation, and state initialization.
//!
//! The genesis file is JSON, the one external boundary where JSON is the
//! canonical format. Validation enforces: at least one validator, validator
//! stakes and initial balances each bounded by the total supply, and no
//! duplicate addresses within a section. Applying a genesis credits the
//! initial accounts, bonds the initial validators, and produces the
//! deterministic state root embedded in the genesis block.

use axon_state::StateStore;
use axon_types::app::{Account, Address, Block, Hash256};
use axon_types::config::{ChainConfig, ConsensusParams};
use axon_types::error::GenesisError;
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

const SECONDS_PER_YEAR: u64 = 31_536_000;

/// Consensus section of the genesis file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisConsensus {
    /// Consensus type tag; only `pos` is recognized.
    #[serde(rename = "type")]
    pub consensus_type: String,
    /// Blocks per epoch.
    pub epoch_length: u64,
    /// Seconds per slot.
    pub slot_duration: u64,
    /// Target active validator count.
    pub validator_count: usize,
    /// Minimum stake to stay a validator.
    pub min_stake: u128,
    /// Stake percentage slashed for liveness faults.
    pub slash_percentage: u8,
    /// Annual reward percentage of total supply.
    pub reward_percentage: u8,
    /// Missed slots per epoch before slashing.
    pub max_missed_blocks: u64,
}

/// Network section of the genesis file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisNetwork {
    /// Chain id, repeated here for façade convenience.
    pub chain_id: u64,
    /// Human-readable network name.
    pub network_name: String,
    /// Default P2P listen port.
    pub p2p_port: u16,
    /// Default JSON-RPC port (façade layer).
    pub rpc_port: u16,
    /// Default websocket port (façade layer).
    pub ws_port: u16,
    /// Default peer cap.
    pub max_peers: usize,
    /// Bootstrap nodes, as `host:port` strings.
    pub bootstrap_nodes: Vec<String>,
}

/// One genesis validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisValidator {
    /// Validator account address.
    pub address: Address,
    /// Initial bonded stake.
    pub stake: u128,
    /// Hex-encoded 32-byte validator identity key.
    pub public_key: String,
    /// Optional display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// One pre-funded genesis account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisAccount {
    /// Account address.
    pub address: Address,
    /// Initial balance.
    pub balance: u128,
    /// Initial nonce.
    #[serde(default)]
    pub nonce: u64,
}

/// The complete genesis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisConfig {
    /// Chain id.
    pub chain_id: u64,
    /// Network name.
    pub network_name: String,
    /// ISO-8601 genesis timestamp.
    pub genesis_time: String,
    /// Consensus parameters.
    pub consensus: GenesisConsensus,
    /// Network parameters.
    pub network: GenesisNetwork,
    /// Initial validator set.
    pub initial_validators: Vec<GenesisValidator>,
    /// Pre-funded accounts.
    pub initial_accounts: Vec<GenesisAccount>,
    /// Total token supply.
    pub total_supply: u128,
    /// Token decimals.
    pub decimals: u8,
    /// Per-block gas limit.
    pub block_gas_limit: u64,
    /// Minimum accepted gas price.
    pub min_gas_price: u64,
    /// Free-form extra data.
    #[serde(default)]
    pub extra_data: serde_json::Value,
}

impl GenesisConfig {
    /// Loads and validates a genesis file.
    pub fn load(path: &Path) -> Result<Self, GenesisError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| GenesisError::Load(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&raw)
    }

    /// Parses and validates a genesis document.
    pub fn from_json(raw: &str) -> Result<Self, GenesisError> {
        let config: GenesisConfig =
            serde_json::from_str(raw).map_err(|e| GenesisError::Load(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration invariants.
    pub fn validate(&self) -> Result<(), GenesisError> {
        if self.initial_validators.is_empty() {
            return Err(GenesisError::NoValidators);
        }

        let stakes: u128 = self.initial_validators.iter().map(|v| v.stake).sum();
        if stakes > self.total_supply {
            return Err(GenesisError::StakeExceedsSupply {
                stakes,
                supply: self.total_supply,
            });
        }
        let balances: u128 = self.initial_accounts.iter().map(|a| a.balance).sum();
        if balances > self.total_supply {
            return Err(GenesisError::BalanceExceedsSupply {
                balances,
                supply: self.total_supply,
            });
        }

        let mut seen = HashSet::new();
        for validator in &self.initial_validators {
            if !seen.insert(validator.address) {
                return Err(GenesisError::DuplicateAddress(validator.address));
            }
            let key = decode_public_key(&validator.public_key)?;
            if key == [0u8; 32] {
                return Err(GenesisError::Invalid(format!(
                    "validator {} has a zero public key",
                    validator.address
                )));
            }
        }
        let mut seen = HashSet::new();
        for account in &self.initial_accounts {
            if !seen.insert(account.address) {
                return Err(GenesisError::DuplicateAddress(account.address));
            }
        }

        self.timestamp()?;
        if self.consensus.consensus_type != "pos" {
            return Err(GenesisError::Invalid(format!(
                "unsupported consensus type {:?}",
                self.consensus.consensus_type
            )));
        }
        if self.consensus.epoch_length == 0 || self.consensus.slot_duration == 0 {
            return Err(GenesisError::Invalid(
                "epoch_length and slot_duration must be positive".into(),
            ));
        }
        Ok(())
    }

    /// The genesis UNIX timestamp.
    pub fn timestamp(&self) -> Result<u64, GenesisError> {
        let parsed = DateTime::parse_from_rfc3339(&self.genesis_time)
            .map_err(|e| GenesisError::Invalid(format!("bad genesis_time: {}", e)))?;
        u64::try_from(parsed.timestamp())
            .map_err(|_| GenesisError::Invalid("genesis_time predates the epoch".into()))
    }

    /// The chain configuration derived from this genesis.
    pub fn chain_config(&self) -> ChainConfig {
        ChainConfig {
            chain_id: self.chain_id,
            block_gas_limit: self.block_gas_limit,
            block_time: self.consensus.slot_duration,
            min_gas_price: self.min_gas_price,
            max_clock_skew: ChainConfig::default().max_clock_skew,
        }
    }

    /// The consensus parameters derived from this genesis. The annual
    /// reward percentage is spread evenly across the year's epochs.
    pub fn consensus_params(&self) -> ConsensusParams {
        let epoch_seconds = self.consensus.slot_duration * self.consensus.epoch_length;
        let epochs_per_year = (SECONDS_PER_YEAR / epoch_seconds.max(1)).max(1);
        let annual_reward = self.total_supply / 100 * self.consensus.reward_percentage as u128;
        ConsensusParams {
            epoch_length: self.consensus.epoch_length,
            validator_count: self.consensus.validator_count,
            min_stake: self.consensus.min_stake,
            block_time: self.consensus.slot_duration,
            max_missed_blocks: self.consensus.max_missed_blocks,
            slash_percent: self.consensus.slash_percentage,
            double_sign_slash_percent: ConsensusParams::default().double_sign_slash_percent,
            base_reward: annual_reward / epochs_per_year as u128,
        }
    }

    /// Applies the genesis allocation to an empty state store and commits.
    /// Returns the resulting state root.
    pub fn apply_to_state(&self, state: &mut StateStore) -> Result<Hash256, GenesisError> {
        for account in &self.initial_accounts {
            state.set_account(
                account.address,
                Account {
                    nonce: account.nonce,
                    balance: account.balance,
                    ..Account::default()
                },
            );
        }
        for validator in &self.initial_validators {
            let key = decode_public_key(&validator.public_key)?;
            state
                .add_stake(&validator.address, validator.stake)
                .map_err(|e| GenesisError::Invalid(e.to_string()))?;
            state.set_validator_meta(validator.address, key, true);
        }
        let root = state.commit();
        info!(
            target: "genesis",
            chain_id = self.chain_id,
            accounts = self.initial_accounts.len(),
            validators = self.initial_validators.len(),
            state_root = %hex::encode(root),
            "applied genesis allocation"
        );
        Ok(root)
    }

    /// Builds the genesis block, with the given post-allocation state
    /// root stamped into the header.
    pub fn build_block(&self, state_root: Hash256) -> Result<Block, GenesisError> {
        let producer = self
            .initial_validators
            .first()
            .ok_or(GenesisError::NoValidators)?;
        let key = decode_public_key(&producer.public_key)?;
        let mut block =
            Block::create_genesis(self.chain_id, self.timestamp()?, key, self.block_gas_limit);
        block.header.state_root = state_root;
        Ok(block)
    }

    /// A minimal single-validator development genesis, used by the CLI's
    /// `genesis generate` command.
    pub fn dev_template(chain_id: u64, validator: &axon_crypto::Keypair) -> Self {
        GenesisConfig {
            chain_id,
            network_name: format!("axon-dev-{}", chain_id),
            genesis_time: "2026-01-01T00:00:00Z".into(),
            consensus: GenesisConsensus {
                consensus_type: "pos".into(),
                epoch_length: 100,
                slot_duration: 12,
                validator_count: 21,
                min_stake: 1_000_000,
                slash_percentage: 5,
                reward_percentage: 5,
                max_missed_blocks: 10,
            },
            network: GenesisNetwork {
                chain_id,
                network_name: format!("axon-dev-{}", chain_id),
                p2p_port: 30303,
                rpc_port: 8545,
                ws_port: 8546,
                max_peers: 50,
                bootstrap_nodes: Vec::new(),
            },
            initial_validators: vec![GenesisValidator {
                address: validator.address(),
                stake: 10_000_000,
                public_key: hex::encode(validator.validator_id()),
                name: Some("dev-validator".into()),
            }],
            initial_accounts: vec![GenesisAccount {
                address: validator.address(),
                balance: 100_000_000,
                nonce: 0,
            }],
            total_supply: 1_000_000_000,
            decimals: 9,
            block_gas_limit: 10_000_000,
            min_gas_price: 1,
            extra_data: serde_json::Value::Null,
        }
    }
}

fn decode_public_key(raw: &str) -> Result<Hash256, GenesisError> {
    let raw = raw.strip_prefix("0x").unwrap_or(raw);
    let bytes =
        hex::decode(raw).map_err(|e| GenesisError::Invalid(format!("bad public key hex: {}", e)))?;
    bytes
        .try_into()
        .map_err(|_| GenesisError::Invalid("public key must be 32 bytes".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axon_crypto::Keypair;

    fn sample() -> GenesisConfig {
        GenesisConfig::dev_template(9999, &Keypair::generate())
    }

    #[test]
    fn template_validates_and_roundtrips() {
        let config = sample();
        config.validate().unwrap();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let restored = GenesisConfig::from_json(&json).unwrap();
        assert_eq!(restored.chain_id, 9999);
        assert_eq!(restored.initial_validators.len(), 1);
    }

    #[test]
    fn rejects_empty_validator_set() {
        let mut config = sample();
        config.initial_validators.clear();
        assert!(matches!(config.validate(), Err(GenesisError::NoValidators)));
    }

    #[test]
    fn rejects_stake_above_supply() {
        let mut config = sample();
        config.initial_validators[0].stake = config.total_supply + 1;
        assert!(matches!(
            config.validate(),
            Err(GenesisError::StakeExceedsSupply { .. })
        ));
    }

    #[test]
    fn rejects_balances_above_supply() {
        let mut config = sample();
        config.initial_accounts[0].balance = config.total_supply + 1;
        assert!(matches!(
            config.validate(),
            Err(GenesisError::BalanceExceedsSupply { .. })
        ));
    }

    #[test]
    fn rejects_duplicate_addresses() {
        let mut config = sample();
        let duplicate = config.initial_accounts[0].clone();
        config.initial_accounts.push(duplicate);
        assert!(matches!(
            config.validate(),
            Err(GenesisError::DuplicateAddress(_))
        ));
    }

    #[test]
    fn rejects_bad_timestamps() {
        let mut config = sample();
        config.genesis_time = "yesterday".into();
        assert!(matches!(config.validate(), Err(GenesisError::Invalid(_))));
    }

    #[test]
    fn state_root_is_deterministic() {
        let config = sample();
        let mut a = StateStore::new();
        let mut b = StateStore::new();
        let root_a = config.apply_to_state(&mut a).unwrap();
        let root_b = config.apply_to_state(&mut b).unwrap();
        assert_eq!(root_a, root_b);
        assert_ne!(root_a, [0u8; 32]);
    }

    #[test]
    fn genesis_block_is_pure() {
        let config = sample();
        let mut state = StateStore::new();
        let root = config.apply_to_state(&mut state).unwrap();
        let block_a = config.build_block(root).unwrap();
        let block_b = config.build_block(root).unwrap();
        assert_eq!(block_a.hash(), block_b.hash());
        assert_eq!(block_a.header.height, 0);
        assert_eq!(block_a.header.previous_hash, [0u8; 32]);
        assert_eq!(block_a.header.state_root, root);
    }

    #[test]
    fn allocation_credits_accounts_and_stakes() {
        let keypair = Keypair::generate();
        let config = GenesisConfig::dev_template(1, &keypair);
        let mut state = StateStore::new();
        config.apply_to_state(&mut state).unwrap();
        assert_eq!(state.get_balance(&keypair.address()), 100_000_000);
        assert_eq!(state.get_stake(&keypair.address()), 10_000_000);
        let meta = state.get_validator_meta(&keypair.address()).unwrap();
        assert_eq!(meta.public_key, keypair.validator_id());
        assert!(meta.active);
    }
}

//! Core error types for the Axon chain.
//!
//! Validation failures are values, never panics. Every variant carries a
//! stable machine-readable code so external surfaces (RPC, CLI) can tag
//! structured errors without string matching.

use crate::app::Address;
use thiserror::Error;

/// A trait for assigning a stable, machine-readable string code to an error.
pub trait ErrorCode {
    /// Returns the unique, stable string identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// Errors from cryptographic operations.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// The provided key material is malformed or invalid.
    #[error("Invalid cryptographic key: {0}")]
    InvalidKey(String),
    /// The provided signature material is malformed.
    #[error("Invalid signature format: {0}")]
    InvalidSignature(String),
    /// The signature failed cryptographic verification.
    #[error("Signature verification failed")]
    VerificationFailed,
    /// The recovered signer does not match the claimed sender.
    #[error("Recovered signer {recovered} does not match sender {claimed}")]
    SignerMismatch {
        /// The address recovered from the signature.
        recovered: Address,
        /// The address the payload claims as its sender.
        claimed: Address,
    },
}

impl ErrorCode for CryptoError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidKey(_) => "CRYPTO_INVALID_KEY",
            Self::InvalidSignature(_) => "CRYPTO_INVALID_SIGNATURE",
            Self::VerificationFailed => "CRYPTO_VERIFICATION_FAILED",
            Self::SignerMismatch { .. } => "CRYPTO_SIGNER_MISMATCH",
        }
    }
}

/// Errors from the state store.
#[derive(Error, Debug)]
pub enum StateError {
    /// A debit exceeded the account's balance.
    #[error("Insufficient balance for {address}: required {required}, available {available}")]
    InsufficientBalance {
        /// The account being debited.
        address: Address,
        /// The amount required.
        required: u128,
        /// The balance actually available.
        available: u128,
    },
    /// An unstake exceeded the bonded amount.
    #[error("Insufficient stake for {address}: required {required}, bonded {bonded}")]
    InsufficientStake {
        /// The validator being unbonded.
        address: Address,
        /// The amount requested.
        required: u128,
        /// The amount actually bonded.
        bonded: u128,
    },
    /// A reward claim found nothing to claim.
    #[error("No pending rewards for {0}")]
    NoPendingRewards(Address),
    /// A rollback referenced a snapshot that does not exist.
    #[error("Unknown state snapshot id {0}")]
    UnknownSnapshot(u64),
    /// A balance or stake update overflowed.
    #[error("Balance overflow for {0}")]
    BalanceOverflow(Address),
    /// A stored record failed to decode.
    #[error("State decode error: {0}")]
    Decode(String),
}

impl ErrorCode for StateError {
    fn code(&self) -> &'static str {
        match self {
            Self::InsufficientBalance { .. } => "STATE_INSUFFICIENT_BALANCE",
            Self::InsufficientStake { .. } => "STATE_INSUFFICIENT_STAKE",
            Self::NoPendingRewards(_) => "STATE_NO_PENDING_REWARDS",
            Self::UnknownSnapshot(_) => "STATE_UNKNOWN_SNAPSHOT",
            Self::BalanceOverflow(_) => "STATE_BALANCE_OVERFLOW",
            Self::Decode(_) => "STATE_DECODE_ERROR",
        }
    }
}

/// Errors from transaction validation and execution.
#[derive(Error, Debug)]
pub enum TransactionError {
    /// The signature failed verification or the recovered signer mismatched.
    #[error("Invalid transaction signature: {0}")]
    InvalidSignature(String),
    /// The transaction nonce does not match the account nonce.
    #[error("Nonce mismatch. Expected {expected}, got {got}")]
    NonceMismatch {
        /// The expected nonce from on-chain state.
        expected: u64,
        /// The nonce provided in the transaction.
        got: u64,
    },
    /// The sender cannot cover `value + gas_limit * gas_price`.
    #[error("Insufficient balance. Required {required}, available {available}")]
    InsufficientBalance {
        /// The maximum cost of the transaction.
        required: u128,
        /// The sender's balance.
        available: u128,
    },
    /// The gas limit is below the intrinsic cost.
    #[error("Gas limit {gas_limit} below intrinsic gas {intrinsic}")]
    GasLimitBelowIntrinsic {
        /// The gas limit set by the sender.
        gas_limit: u64,
        /// The computed intrinsic gas.
        intrinsic: u64,
    },
    /// The gas limit exceeds the per-block maximum.
    #[error("Gas limit {gas_limit} exceeds block gas limit {block_gas_limit}")]
    GasLimitAboveBlock {
        /// The gas limit set by the sender.
        gas_limit: u64,
        /// The chain's block gas limit.
        block_gas_limit: u64,
    },
    /// The gas price is below the chain minimum.
    #[error("Gas price {gas_price} below minimum {min_gas_price}")]
    GasPriceTooLow {
        /// The gas price offered.
        gas_price: u64,
        /// The chain's minimum gas price.
        min_gas_price: u64,
    },
    /// An unstake exceeded the bonded amount.
    #[error("Insufficient stake: required {required}, bonded {bonded}")]
    InsufficientStake {
        /// The amount requested.
        required: u128,
        /// The amount bonded.
        bonded: u128,
    },
    /// A reward claim found nothing to claim.
    #[error("No pending rewards to claim")]
    NoPendingRewards,
    /// A stake registration is missing its validator identity key.
    #[error("Stake transaction requires a validator public key")]
    MissingPublicKey,
    /// The mempool refused the transaction.
    #[error("Mempool rejected transaction: {0}")]
    MempoolRejected(String),
    /// An error surfaced from the state store.
    #[error("State error: {0}")]
    State(#[from] StateError),
}

impl ErrorCode for TransactionError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidSignature(_) => "TX_INVALID_SIGNATURE",
            Self::NonceMismatch { .. } => "TX_NONCE_MISMATCH",
            Self::InsufficientBalance { .. } => "TX_INSUFFICIENT_BALANCE",
            Self::GasLimitBelowIntrinsic { .. } => "TX_GAS_LIMIT_BELOW_INTRINSIC",
            Self::GasLimitAboveBlock { .. } => "TX_GAS_LIMIT_ABOVE_BLOCK",
            Self::GasPriceTooLow { .. } => "TX_GAS_PRICE_TOO_LOW",
            Self::InsufficientStake { .. } => "TX_INSUFFICIENT_STAKE",
            Self::NoPendingRewards => "TX_NO_PENDING_REWARDS",
            Self::MissingPublicKey => "TX_MISSING_PUBLIC_KEY",
            Self::MempoolRejected(_) => "TX_MEMPOOL_REJECTED",
            Self::State(_) => "TX_STATE_ERROR",
        }
    }
}

impl From<CryptoError> for TransactionError {
    fn from(e: CryptoError) -> Self {
        TransactionError::InvalidSignature(e.to_string())
    }
}

/// Errors from block validation.
#[derive(Error, Debug)]
pub enum BlockError {
    /// The block's structural invariants do not hold.
    #[error("Invalid block structure: {0}")]
    InvalidStructure(String),
    /// Declared gas usage exceeds the block gas limit.
    #[error("Block gas used {gas_used} exceeds gas limit {gas_limit}")]
    GasLimitExceeded {
        /// The declared gas usage.
        gas_used: u64,
        /// The block gas limit.
        gas_limit: u64,
    },
    /// The block does not link to its parent.
    #[error("Mismatched previous hash. Expected {expected}, got {got}")]
    InvalidParent {
        /// Hex of the parent's header hash.
        expected: String,
        /// Hex of the `previous_hash` carried by the block.
        got: String,
    },
    /// The block height is not `parent.height + 1`.
    #[error("Invalid block height. Expected {expected}, got {got}")]
    InvalidHeight {
        /// The expected height.
        expected: u64,
        /// The height carried by the block.
        got: u64,
    },
    /// The timestamp is not after the parent's, or is too far in the future.
    #[error("Invalid timestamp {timestamp} (parent {parent_timestamp}, max skew {max_skew}s)")]
    InvalidTimestamp {
        /// The block's timestamp.
        timestamp: u64,
        /// The parent block's timestamp.
        parent_timestamp: u64,
        /// The allowed clock skew into the future.
        max_skew: u64,
    },
    /// The producer is not the slot's elected validator, or its signature
    /// does not verify.
    #[error("Invalid validator for block: {0}")]
    InvalidValidator(String),
    /// The transaction Merkle root does not match the header.
    #[error("Transaction merkle root mismatch")]
    InvalidTxsRoot,
    /// The post-execution state root does not match the header.
    #[error("Mismatched state root. Expected {expected}, got {got}")]
    InvalidStateRoot {
        /// Hex of the header's state root.
        expected: String,
        /// Hex of the locally computed state root.
        got: String,
    },
    /// Header `gas_used` disagrees with the sum over transactions.
    #[error("Block gas used mismatch. Header {header}, computed {computed}")]
    GasUsedMismatch {
        /// The header's declared gas usage.
        header: u64,
        /// The locally computed gas usage.
        computed: u64,
    },
    /// A transaction inside the block failed validation.
    #[error("Invalid transaction at index {index}: {source}")]
    InvalidTransaction {
        /// Position of the offending transaction.
        index: usize,
        /// The underlying validation failure.
        source: TransactionError,
    },
}

impl ErrorCode for BlockError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidStructure(_) => "BLOCK_INVALID_STRUCTURE",
            Self::GasLimitExceeded { .. } => "BLOCK_GAS_LIMIT_EXCEEDED",
            Self::InvalidParent { .. } => "BLOCK_INVALID_PARENT",
            Self::InvalidHeight { .. } => "BLOCK_INVALID_HEIGHT",
            Self::InvalidTimestamp { .. } => "BLOCK_INVALID_TIMESTAMP",
            Self::InvalidValidator(_) => "BLOCK_INVALID_VALIDATOR",
            Self::InvalidTxsRoot => "BLOCK_INVALID_TXS_ROOT",
            Self::InvalidStateRoot { .. } => "BLOCK_INVALID_STATE_ROOT",
            Self::GasUsedMismatch { .. } => "BLOCK_GAS_USED_MISMATCH",
            Self::InvalidTransaction { .. } => "BLOCK_INVALID_TRANSACTION",
        }
    }
}

/// Errors from the Proof-of-Stake engine.
#[derive(Error, Debug)]
pub enum ConsensusError {
    /// Fewer participating validators than the configured minimum.
    #[error("Insufficient validators: {got} < {min}")]
    InsufficientValidators {
        /// The number of participating validators.
        got: usize,
        /// The configured minimum.
        min: usize,
    },
    /// The active set is empty.
    #[error("No active validators")]
    NoActiveValidators,
    /// The active set's total stake is zero.
    #[error("Total active stake is zero")]
    ZeroTotalStake,
    /// A block was produced by a validator other than the slot leader.
    #[error("Block producer mismatch. Expected {expected}, got {got}")]
    BlockProducerMismatch {
        /// The elected leader for the slot.
        expected: Address,
        /// The producer carried by the block.
        got: Address,
    },
    /// Submitted misbehavior evidence does not hold up.
    #[error("Invalid evidence: {0}")]
    InvalidEvidence(String),
    /// An error surfaced from the state store.
    #[error("State error: {0}")]
    State(#[from] StateError),
}

impl ErrorCode for ConsensusError {
    fn code(&self) -> &'static str {
        match self {
            Self::InsufficientValidators { .. } => "CONSENSUS_INSUFFICIENT_VALIDATORS",
            Self::NoActiveValidators => "CONSENSUS_NO_ACTIVE_VALIDATORS",
            Self::ZeroTotalStake => "CONSENSUS_ZERO_TOTAL_STAKE",
            Self::BlockProducerMismatch { .. } => "CONSENSUS_BLOCK_PRODUCER_MISMATCH",
            Self::InvalidEvidence(_) => "CONSENSUS_INVALID_EVIDENCE",
            Self::State(_) => "CONSENSUS_STATE_ERROR",
        }
    }
}

/// Errors from the optimistic rollup layer.
#[derive(Error, Debug)]
pub enum RollupError {
    /// The referenced commitment is unknown or already finalized.
    #[error("Commitment not found")]
    CommitmentNotFound,
    /// The challenge period has already expired.
    #[error("Challenge period expired at block {finalize_at_block} (current {current_block})")]
    ChallengePeriodExpired {
        /// The block at which the commitment finalizes.
        finalize_at_block: u64,
        /// The current L1 block.
        current_block: u64,
    },
    /// The challenge period has not yet expired.
    #[error("Challenge period still open until block {finalize_at_block} (current {current_block})")]
    ChallengePeriodOpen {
        /// The block at which the commitment finalizes.
        finalize_at_block: u64,
        /// The current L1 block.
        current_block: u64,
    },
    /// The commitment was already successfully challenged.
    #[error("Commitment already challenged")]
    AlreadyChallenged,
    /// The submitted fraud proof does not demonstrate fraud.
    #[error("Invalid fraud proof: {0}")]
    InvalidFraudProof(String),
    /// An error surfaced from the scoring engine.
    #[error("Scoring error: {0}")]
    Consensus(#[from] ConsensusError),
}

impl ErrorCode for RollupError {
    fn code(&self) -> &'static str {
        match self {
            Self::CommitmentNotFound => "ROLLUP_COMMITMENT_NOT_FOUND",
            Self::ChallengePeriodExpired { .. } => "ROLLUP_CHALLENGE_PERIOD_EXPIRED",
            Self::ChallengePeriodOpen { .. } => "ROLLUP_CHALLENGE_PERIOD_OPEN",
            Self::AlreadyChallenged => "ROLLUP_ALREADY_CHALLENGED",
            Self::InvalidFraudProof(_) => "ROLLUP_INVALID_FRAUD_PROOF",
            Self::Consensus(_) => "ROLLUP_CONSENSUS_ERROR",
        }
    }
}

/// Errors from the wire protocol and peer management.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// A frame or payload could not be decoded.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),
    /// A frame declared a length above the configured maximum.
    #[error("Oversized message: {size} bytes (max {max})")]
    OversizedMessage {
        /// The declared frame size.
        size: usize,
        /// The configured maximum.
        max: usize,
    },
    /// The frame header itself was invalid.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
    /// The message type byte is not recognized.
    #[error("Unknown message type: {0:#04x}")]
    UnknownMessageType(u8),
    /// The handshake did not complete.
    #[error("Peer handshake failed: {0}")]
    PeerHandshakeFailed(String),
    /// A peer operation timed out.
    #[error("Peer timed out")]
    PeerTimeout,
    /// The peer belongs to a different network.
    #[error("Wrong network: ours {ours}, theirs {theirs}")]
    WrongNetwork {
        /// Our network id.
        ours: u64,
        /// The peer's network id.
        theirs: u64,
    },
    /// The peer's genesis hash differs from ours.
    #[error("Genesis hash mismatch")]
    GenesisMismatch,
    /// The connection limit was reached.
    #[error("Maximum peer count reached")]
    MaxPeersReached,
    /// The peer is no longer connected.
    #[error("Peer disconnected")]
    Disconnected,
    /// An underlying socket error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ErrorCode for NetworkError {
    fn code(&self) -> &'static str {
        match self {
            Self::MalformedMessage(_) => "NET_MALFORMED_MESSAGE",
            Self::OversizedMessage { .. } => "NET_OVERSIZED_MESSAGE",
            Self::InvalidFrame(_) => "NET_INVALID_FRAME",
            Self::UnknownMessageType(_) => "NET_UNKNOWN_MESSAGE_TYPE",
            Self::PeerHandshakeFailed(_) => "NET_PEER_HANDSHAKE_FAILED",
            Self::PeerTimeout => "NET_PEER_TIMEOUT",
            Self::WrongNetwork { .. } => "NET_WRONG_NETWORK",
            Self::GenesisMismatch => "NET_GENESIS_MISMATCH",
            Self::MaxPeersReached => "NET_MAX_PEERS_REACHED",
            Self::Disconnected => "NET_DISCONNECTED",
            Self::Io(_) => "NET_IO_ERROR",
        }
    }
}

/// Errors from the persistent chain store.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The requested record does not exist.
    #[error("Not found")]
    NotFound,
    /// The store contains data that cannot be decoded. Fatal.
    #[error("Storage corrupted: {0}")]
    Corrupted(String),
    /// A write could not be completed.
    #[error("Write failed: {0}")]
    WriteFailed(String),
    /// An error in the backing key-value engine.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl ErrorCode for StorageError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "STORAGE_NOT_FOUND",
            Self::Corrupted(_) => "STORAGE_CORRUPTED",
            Self::WriteFailed(_) => "STORAGE_WRITE_FAILED",
            Self::Backend(_) => "STORAGE_BACKEND_ERROR",
        }
    }
}

/// Errors from genesis configuration loading and validation.
#[derive(Error, Debug)]
pub enum GenesisError {
    /// The genesis file could not be read or parsed.
    #[error("Failed to load genesis: {0}")]
    Load(String),
    /// A genesis requires at least one validator.
    #[error("Genesis must declare at least one validator")]
    NoValidators,
    /// Validator stakes exceed the declared total supply.
    #[error("Sum of validator stakes {stakes} exceeds total supply {supply}")]
    StakeExceedsSupply {
        /// The sum of validator stakes.
        stakes: u128,
        /// The declared total supply.
        supply: u128,
    },
    /// Initial balances exceed the declared total supply.
    #[error("Sum of initial balances {balances} exceeds total supply {supply}")]
    BalanceExceedsSupply {
        /// The sum of initial balances.
        balances: u128,
        /// The declared total supply.
        supply: u128,
    },
    /// An address appears more than once.
    #[error("Duplicate genesis address {0}")]
    DuplicateAddress(Address),
    /// A field failed validation.
    #[error("Invalid genesis: {0}")]
    Invalid(String),
}

impl ErrorCode for GenesisError {
    fn code(&self) -> &'static str {
        match self {
            Self::Load(_) => "GENESIS_LOAD_FAILED",
            Self::NoValidators => "GENESIS_NO_VALIDATORS",
            Self::StakeExceedsSupply { .. } => "GENESIS_STAKE_EXCEEDS_SUPPLY",
            Self::BalanceExceedsSupply { .. } => "GENESIS_BALANCE_EXCEEDS_SUPPLY",
            Self::DuplicateAddress(_) => "GENESIS_DUPLICATE_ADDRESS",
            Self::Invalid(_) => "GENESIS_INVALID",
        }
    }
}

/// Top-level error for chain orchestration.
#[derive(Error, Debug)]
pub enum ChainError {
    /// An error during block processing.
    #[error("Block error: {0}")]
    Block(#[from] BlockError),
    /// An error during transaction processing.
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),
    /// An error in the state store.
    #[error("State error: {0}")]
    State(#[from] StateError),
    /// An error in the consensus engine.
    #[error("Consensus error: {0}")]
    Consensus(#[from] ConsensusError),
    /// An error in the chain store. Corruption is fatal.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    /// An error in the networking layer.
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),
    /// An error in genesis handling. Fatal at startup.
    #[error("Genesis error: {0}")]
    Genesis(#[from] GenesisError),
    /// An error from a cryptographic primitive.
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl ErrorCode for ChainError {
    fn code(&self) -> &'static str {
        match self {
            Self::Block(e) => e.code(),
            Self::Transaction(e) => e.code(),
            Self::State(e) => e.code(),
            Self::Consensus(e) => e.code(),
            Self::Storage(e) => e.code(),
            Self::Network(e) => e.code(),
            Self::Genesis(e) => e.code(),
            Self::Crypto(e) => e.code(),
        }
    }
}

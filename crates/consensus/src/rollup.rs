//! The optimistic rollup layer.
//!
//! Validators score miners off-chain; an aggregator runs the scoring
//! algorithm, builds a commitment over the raw inputs and the final
//! scores, and publishes only the commitment hash on-chain. During the
//! challenge period any validator may submit a fraud proof; an accepted
//! proof slashes the aggregator, rewards the challenger, and dooms the
//! commitment. Unchallenged commitments finalize after the period and
//! their scores are written through to L1 state.
//!
//! State machine: `pending → {challenged, finalized}`;
//! `challenged → rejected`. `finalized` and `rejected` are terminal.

use crate::scoring::{aggregate_scores, ScoringConfig, ScoringEngine};
use async_trait::async_trait;
use axon_crypto::sha256;
use axon_types::app::Hash256;
use axon_types::codec;
use axon_types::error::RollupError;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Status of a consensus commitment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitmentStatus {
    /// Inside the challenge period, unchallenged.
    Pending,
    /// A fraud proof was accepted; will reject at expiry.
    Challenged,
    /// Challenge period passed without an accepted challenge. Terminal.
    Finalized,
    /// Challenged and expired. Terminal.
    Rejected,
}

/// A commitment over one off-chain consensus round.
#[derive(Debug, Clone)]
pub struct ConsensusCommitment {
    /// Subnet the scores belong to.
    pub subnet_uid: u64,
    /// Epoch of the consensus round.
    pub epoch: u64,
    /// Digest of the canonical commitment payload.
    pub commitment_hash: Hash256,
    /// Final consensus scores by miner id.
    pub consensus_scores: BTreeMap<String, f64>,
    /// Miner ids in score-vector order; the index of a miner id here is
    /// its column in `validator_scores`.
    pub miner_ids: Vec<String>,
    /// Raw per-validator score vectors, kept for recomputation.
    pub validator_scores: BTreeMap<String, Vec<f64>>,
    /// The normalized per-validator weights the aggregation used. With
    /// the raw scores these make the committed output exactly
    /// recomputable.
    pub validator_weights: BTreeMap<String, f64>,
    /// Digest of the committed weight vector.
    pub weight_matrix_hash: Hash256,
    /// UNIX timestamp of aggregation.
    pub timestamp: u64,
    /// The aggregating validator.
    pub aggregator_id: String,
    /// The aggregator's signature over the commitment hash.
    pub aggregator_signature: Vec<u8>,
    /// Current lifecycle status.
    pub status: CommitmentStatus,
    /// L1 block at which the challenge period ends.
    pub finalize_at_block: u64,
    /// Challenger id, once challenged.
    pub challenged_by: Option<String>,
    /// Reason recorded by the accepted challenge.
    pub challenge_reason: Option<String>,
}

/// Evidence that a commitment's claimed score deviates from recomputation.
#[derive(Debug, Clone)]
pub struct FraudProof {
    /// The challenged commitment.
    pub commitment_hash: Hash256,
    /// The validator submitting the proof.
    pub challenger_id: String,
    /// The miner whose score is contested.
    pub miner_id: String,
    /// Category of the alleged fraud.
    pub fraud_type: String,
    /// The score the aggregator committed to.
    pub claimed_score: f64,
    /// The score recomputation yields.
    pub actual_score: f64,
    /// Supporting evidence, opaque to the protocol.
    pub evidence: Vec<u8>,
    /// The challenger's signature over the proof.
    pub challenger_signature: Vec<u8>,
}

/// Configuration for the rollup layer.
#[derive(Debug, Clone)]
pub struct RollupConfig {
    /// Challenge window in L1 blocks.
    pub challenge_period_blocks: u64,
    /// Minimum validators per consensus round.
    pub min_validators: usize,
    /// Deviation (in percent) above which a fraud proof is accepted.
    pub max_deviation_percent: f64,
    /// Stake slashed from a fraudulent aggregator.
    pub slash_amount: u128,
    /// Reward paid to a successful challenger.
    pub fraud_proof_reward: u128,
}

impl Default for RollupConfig {
    fn default() -> Self {
        RollupConfig {
            challenge_period_blocks: 100,
            min_validators: 3,
            max_deviation_percent: 5.0,
            slash_amount: 1_000_000,
            fraud_proof_reward: 100_000,
        }
    }
}

/// The rollup layer's view of the underlying L1.
#[async_trait]
pub trait L1Interface: Send + Sync {
    /// The current L1 block height.
    async fn current_block(&self) -> u64;

    /// Publishes a commitment hash on-chain; returns the L1 tx hash.
    async fn publish_commitment(
        &self,
        subnet_uid: u64,
        epoch: u64,
        commitment_hash: Hash256,
        aggregator_id: &str,
    ) -> Result<Hash256, RollupError>;

    /// Slashes stake from a dishonest validator.
    async fn slash_validator(&self, validator_id: &str, amount: u128) -> Result<(), RollupError>;

    /// Rewards a validator for a successful fraud proof.
    async fn reward_validator(&self, validator_id: &str, amount: u128) -> Result<(), RollupError>;

    /// Writes finalized consensus scores through to L1 state.
    async fn finalize_consensus(
        &self,
        commitment_hash: Hash256,
        scores: &BTreeMap<String, f64>,
    ) -> Result<(), RollupError>;
}

/// The optimistic rollup engine.
pub struct OptimisticRollup<L: L1Interface> {
    l1: L,
    config: RollupConfig,
    scoring: ScoringEngine,
    pending: BTreeMap<Hash256, ConsensusCommitment>,
    finalized: BTreeMap<Hash256, ConsensusCommitment>,
    fraud_proofs: BTreeMap<Hash256, Vec<FraudProof>>,
}

fn short(hash: &Hash256) -> String {
    hex::encode(hash.get(..8).unwrap_or_default())
}

/// Encodes an f64 map deterministically via the bit pattern of each score.
fn encode_scores(scores: &BTreeMap<String, f64>) -> Vec<(String, u64)> {
    scores
        .iter()
        .map(|(id, score)| (id.clone(), score.to_bits()))
        .collect()
}

fn encode_matrix(matrix: &BTreeMap<String, Vec<f64>>) -> Vec<(String, Vec<u64>)> {
    matrix
        .iter()
        .map(|(id, scores)| (id.clone(), scores.iter().map(|s| s.to_bits()).collect()))
        .collect()
}

impl<L: L1Interface> OptimisticRollup<L> {
    /// Creates a rollup layer over the given L1 interface.
    pub fn new(l1: L, config: RollupConfig, scoring_config: ScoringConfig) -> Self {
        OptimisticRollup {
            l1,
            config,
            scoring: ScoringEngine::new(scoring_config),
            pending: BTreeMap::new(),
            finalized: BTreeMap::new(),
            fraud_proofs: BTreeMap::new(),
        }
    }

    /// The rollup configuration.
    pub fn config(&self) -> &RollupConfig {
        &self.config
    }

    /// The scoring engine (trust table lives here).
    pub fn scoring(&self) -> &ScoringEngine {
        &self.scoring
    }

    /// Mutable access to the scoring engine.
    pub fn scoring_mut(&mut self) -> &mut ScoringEngine {
        &mut self.scoring
    }

    /// Runs a full off-chain consensus round: scores, commits, publishes
    /// the hash on-chain, and opens the challenge period.
    pub async fn run_consensus_round(
        &mut self,
        subnet_uid: u64,
        epoch: u64,
        validator_scores: BTreeMap<String, Vec<f64>>,
        validator_stakes: &BTreeMap<String, u128>,
        miner_ids: &[String],
        aggregator_id: &str,
        timestamp: u64,
    ) -> Result<(BTreeMap<String, f64>, Hash256), RollupError> {
        let (consensus_scores, validator_weights) = self.scoring.calculate_consensus_detailed(
            &validator_scores,
            validator_stakes,
            miner_ids,
            epoch,
        )?;

        let weight_matrix_hash = sha256(&codec::to_bytes_canonical(&encode_scores(
            &validator_weights,
        )));
        let payload = codec::to_bytes_canonical(&(
            subnet_uid,
            epoch,
            encode_scores(&consensus_scores),
            encode_matrix(&validator_scores),
            encode_scores(&validator_weights),
            &weight_matrix_hash,
            aggregator_id,
            timestamp,
        ));
        let commitment_hash = sha256(&payload);
        // Off-chain commitments are attributable through the aggregator id
        // carried in the payload; a detached signature rides along for
        // façade layers that want to re-verify without the L1.
        let aggregator_signature = sha256(
            &[commitment_hash.as_slice(), aggregator_id.as_bytes()].concat(),
        )
        .to_vec();

        let tx_hash = self
            .l1
            .publish_commitment(subnet_uid, epoch, commitment_hash, aggregator_id)
            .await?;
        let current_block = self.l1.current_block().await;
        let finalize_at_block = current_block + self.config.challenge_period_blocks;

        let commitment = ConsensusCommitment {
            subnet_uid,
            epoch,
            commitment_hash,
            consensus_scores: consensus_scores.clone(),
            miner_ids: miner_ids.to_vec(),
            validator_scores,
            validator_weights,
            weight_matrix_hash,
            timestamp,
            aggregator_id: aggregator_id.to_string(),
            aggregator_signature,
            status: CommitmentStatus::Pending,
            finalize_at_block,
            challenged_by: None,
            challenge_reason: None,
        };
        self.pending.insert(commitment_hash, commitment);

        info!(
            target: "rollup",
            subnet_uid,
            epoch,
            commitment = %short(&commitment_hash),
            l1_tx = %short(&tx_hash),
            finalize_at_block,
            "consensus committed"
        );
        Ok((consensus_scores, commitment_hash))
    }

    /// Submits a fraud proof against a pending commitment.
    ///
    /// The protocol recomputes the contested miner's score from the
    /// commitment's stored inputs; if the committed score deviates by more
    /// than the configured percentage, the proof is accepted: the
    /// commitment is marked challenged, the aggregator is slashed, and the
    /// challenger is rewarded.
    pub async fn submit_fraud_proof(&mut self, proof: FraudProof) -> Result<(), RollupError> {
        let current_block = self.l1.current_block().await;
        let commitment = self
            .pending
            .get_mut(&proof.commitment_hash)
            .ok_or(RollupError::CommitmentNotFound)?;

        if current_block >= commitment.finalize_at_block {
            return Err(RollupError::ChallengePeriodExpired {
                finalize_at_block: commitment.finalize_at_block,
                current_block,
            });
        }
        if commitment.status == CommitmentStatus::Challenged {
            return Err(RollupError::AlreadyChallenged);
        }

        let committed = commitment
            .consensus_scores
            .get(&proof.miner_id)
            .copied()
            .ok_or_else(|| {
                RollupError::InvalidFraudProof(format!("unknown miner {}", proof.miner_id))
            })?;
        if (committed - proof.claimed_score).abs() > 1e-9 {
            return Err(RollupError::InvalidFraudProof(format!(
                "claimed score {} does not match committed score {}",
                proof.claimed_score, committed
            )));
        }

        if !commitment.miner_ids.iter().any(|id| id == &proof.miner_id) {
            return Err(RollupError::InvalidFraudProof(format!(
                "miner {} not covered by commitment",
                proof.miner_id
            )));
        }
        // Recompute the aggregation from the commitment's stored inputs;
        // the committed weights make this exact.
        let recomputed = aggregate_scores(
            self.scoring.config(),
            &commitment.validator_scores,
            &commitment.validator_weights,
            &commitment.miner_ids,
        );
        let actual = recomputed.get(&proof.miner_id).copied().ok_or_else(|| {
            RollupError::InvalidFraudProof("no validator scores for miner".into())
        })?;

        let deviation_percent = (proof.claimed_score - actual).abs() / (actual + 1e-9) * 100.0;
        if deviation_percent <= self.config.max_deviation_percent {
            return Err(RollupError::InvalidFraudProof(format!(
                "deviation {:.2}% within tolerance {:.2}%",
                deviation_percent, self.config.max_deviation_percent
            )));
        }

        commitment.status = CommitmentStatus::Challenged;
        commitment.challenged_by = Some(proof.challenger_id.clone());
        commitment.challenge_reason = Some(proof.fraud_type.clone());
        let aggregator = commitment.aggregator_id.clone();

        warn!(
            target: "rollup",
            commitment = %short(&proof.commitment_hash),
            %aggregator,
            challenger = %proof.challenger_id,
            deviation_percent,
            "fraud proof accepted"
        );

        self.l1
            .slash_validator(&aggregator, self.config.slash_amount)
            .await?;
        self.l1
            .reward_validator(&proof.challenger_id, self.config.fraud_proof_reward)
            .await?;
        self.fraud_proofs
            .entry(proof.commitment_hash)
            .or_default()
            .push(proof);
        Ok(())
    }

    /// Settles one commitment whose challenge period has expired:
    /// `pending` finalizes (scores written through to L1); `challenged`
    /// rejects with no state change.
    pub async fn finalize_commitment(
        &mut self,
        commitment_hash: Hash256,
    ) -> Result<CommitmentStatus, RollupError> {
        let current_block = self.l1.current_block().await;
        let commitment = self
            .pending
            .get(&commitment_hash)
            .ok_or(RollupError::CommitmentNotFound)?;

        if current_block < commitment.finalize_at_block {
            return Err(RollupError::ChallengePeriodOpen {
                finalize_at_block: commitment.finalize_at_block,
                current_block,
            });
        }

        // Taking the entry out keeps the pending map consistent even if
        // the L1 write below fails and is retried.
        let mut commitment = self
            .pending
            .remove(&commitment_hash)
            .ok_or(RollupError::CommitmentNotFound)?;
        let status = match commitment.status {
            CommitmentStatus::Challenged => {
                commitment.status = CommitmentStatus::Rejected;
                info!(
                    target: "rollup",
                    commitment = %short(&commitment_hash),
                    "challenged commitment rejected"
                );
                CommitmentStatus::Rejected
            }
            _ => {
                if let Err(e) = self
                    .l1
                    .finalize_consensus(commitment_hash, &commitment.consensus_scores)
                    .await
                {
                    self.pending.insert(commitment_hash, commitment);
                    return Err(e);
                }
                commitment.status = CommitmentStatus::Finalized;
                info!(
                    target: "rollup",
                    commitment = %short(&commitment_hash),
                    scores = commitment.consensus_scores.len(),
                    "commitment finalized on L1"
                );
                CommitmentStatus::Finalized
            }
        };
        self.finalized.insert(commitment_hash, commitment);
        Ok(status)
    }

    /// Settles every commitment whose challenge period has expired.
    pub async fn process_expired(&mut self) -> Vec<(Hash256, CommitmentStatus)> {
        let current_block = self.l1.current_block().await;
        let expired: Vec<Hash256> = self
            .pending
            .iter()
            .filter(|(_, c)| current_block >= c.finalize_at_block)
            .map(|(hash, _)| *hash)
            .collect();
        let mut settled = Vec::with_capacity(expired.len());
        for hash in expired {
            if let Ok(status) = self.finalize_commitment(hash).await {
                settled.push((hash, status));
            }
        }
        settled
    }

    /// Status of a commitment, if known.
    pub fn commitment_status(&self, hash: &Hash256) -> Option<CommitmentStatus> {
        self.pending
            .get(hash)
            .or_else(|| self.finalized.get(hash))
            .map(|c| c.status)
    }

    /// All commitments still inside their challenge period.
    pub fn pending_commitments(&self) -> Vec<&ConsensusCommitment> {
        self.pending.values().collect()
    }

    /// Final consensus scores for a finalized commitment.
    pub fn finalized_consensus(&self, hash: &Hash256) -> Option<&BTreeMap<String, f64>> {
        self.finalized
            .get(hash)
            .filter(|c| c.status == CommitmentStatus::Finalized)
            .map(|c| &c.consensus_scores)
    }

    /// Accepted fraud proofs for a commitment.
    pub fn fraud_proofs(&self, hash: &Hash256) -> &[FraudProof] {
        self.fraud_proofs
            .get(hash)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

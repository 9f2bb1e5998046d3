//! The enhanced scoring algorithm.
//!
//! Aggregates per-validator score vectors into a final consensus score per
//! miner. Compared to a naive stake-weighted mean this adds stake
//! dampening, historical trust weighting, outlier suppression, a weighted
//! median, and a non-linear bonding curve, which together resist
//! manipulation by large stakeholders and malicious scorers.

use axon_types::error::ConsensusError;
use std::collections::BTreeMap;
use tracing::debug;

/// Configuration for the scoring engine.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    /// Bonding-curve exponent `alpha` in `f(x) = x^alpha`. Values above 1
    /// reward top performers super-linearly.
    pub bonding_curve_alpha: f64,
    /// Stake dampening exponent: `weight ∝ stake^dampening`. 1.0 is no
    /// dampening; 0.5 is square-root dampening.
    pub stake_dampening: f64,
    /// Scores further than this many standard deviations from the column
    /// mean are treated as outliers.
    pub outlier_threshold_std: f64,
    /// Minimum number of participating validators.
    pub min_validators: usize,
    /// Per-epoch trust decay for validators that did not participate.
    pub trust_decay_rate: f64,
    /// EMA rate at which trust adapts to fresh deviations.
    pub trust_update_rate: f64,
    /// Aggregate with a weighted median instead of a weighted mean.
    pub use_weighted_median: bool,
    /// Validators below this trust contribute zero weight; also the trust
    /// floor.
    pub min_trust: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        ScoringConfig {
            bonding_curve_alpha: 2.0,
            stake_dampening: 0.5,
            outlier_threshold_std: 2.5,
            min_validators: 3,
            trust_decay_rate: 0.95,
            trust_update_rate: 0.1,
            use_weighted_median: true,
            min_trust: 0.1,
        }
    }
}

/// Historical trust for one validator.
#[derive(Debug, Clone)]
pub struct ValidatorTrust {
    /// Trust in `[min_trust, 1]`; new validators start at 0.5.
    pub trust: f64,
    /// EMA of the validator's absolute deviation from consensus.
    pub avg_deviation: f64,
    /// Epoch of the last update.
    pub last_updated_epoch: u64,
}

/// The scoring engine with its persistent trust table.
#[derive(Debug, Default)]
pub struct ScoringEngine {
    config: ScoringConfig,
    trust: BTreeMap<String, ValidatorTrust>,
}

impl ScoringEngine {
    /// Creates an engine with the given configuration.
    pub fn new(config: ScoringConfig) -> Self {
        ScoringEngine {
            config,
            trust: BTreeMap::new(),
        }
    }

    /// The engine's configuration.
    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Computes final consensus scores in `[0, 1]` for each miner.
    ///
    /// `validator_scores` maps validator ids to per-miner score vectors
    /// (indexed like `miner_ids`); `validator_stakes` supplies each
    /// validator's bonded stake.
    pub fn calculate_consensus(
        &mut self,
        validator_scores: &BTreeMap<String, Vec<f64>>,
        validator_stakes: &BTreeMap<String, u128>,
        miner_ids: &[String],
        current_epoch: u64,
    ) -> Result<BTreeMap<String, f64>, ConsensusError> {
        self.calculate_consensus_detailed(validator_scores, validator_stakes, miner_ids, current_epoch)
            .map(|(consensus, _)| consensus)
    }

    /// Like [`calculate_consensus`](Self::calculate_consensus), but also
    /// returns the normalized per-validator weights that were used. The
    /// rollup layer commits these weights so that any party can recompute
    /// the aggregation byte-for-byte.
    pub fn calculate_consensus_detailed(
        &mut self,
        validator_scores: &BTreeMap<String, Vec<f64>>,
        validator_stakes: &BTreeMap<String, u128>,
        miner_ids: &[String],
        current_epoch: u64,
    ) -> Result<(BTreeMap<String, f64>, BTreeMap<String, f64>), ConsensusError> {
        if validator_scores.len() < self.config.min_validators {
            return Err(ConsensusError::InsufficientValidators {
                got: validator_scores.len(),
                min: self.config.min_validators,
            });
        }

        self.initialize_trust(validator_scores.keys());
        let weights = self.stake_weights(validator_scores.keys(), validator_stakes);
        let consensus = aggregate_scores(&self.config, validator_scores, &weights, miner_ids);

        self.update_trust(validator_scores, &consensus, miner_ids, current_epoch);
        Ok((consensus, weights))
    }

    /// Current trust scores by validator id.
    pub fn trust_scores(&self) -> BTreeMap<String, f64> {
        self.trust
            .iter()
            .map(|(id, t)| (id.clone(), t.trust))
            .collect()
    }

    /// Exports the trust table for persistence.
    pub fn export_trust(&self) -> BTreeMap<String, ValidatorTrust> {
        self.trust.clone()
    }

    /// Restores a previously exported trust table.
    pub fn import_trust(&mut self, table: BTreeMap<String, ValidatorTrust>) {
        self.trust = table;
    }

    fn initialize_trust<'a>(&mut self, validator_ids: impl Iterator<Item = &'a String>) {
        for id in validator_ids {
            self.trust.entry(id.clone()).or_insert(ValidatorTrust {
                trust: 0.5,
                avg_deviation: 0.0,
                last_updated_epoch: 0,
            });
        }
    }

    /// Dampened, trust-adjusted, normalized stake weights. Validators
    /// below the trust floor contribute nothing.
    fn stake_weights<'a>(
        &self,
        validator_ids: impl Iterator<Item = &'a String>,
        stakes: &BTreeMap<String, u128>,
    ) -> BTreeMap<String, f64> {
        let mut weights = BTreeMap::new();
        for id in validator_ids {
            let stake = stakes.get(id).copied().unwrap_or(0);
            if stake == 0 {
                weights.insert(id.clone(), 0.0);
                continue;
            }
            let trust = self.trust.get(id).map(|t| t.trust).unwrap_or(0.5);
            if trust < self.config.min_trust {
                weights.insert(id.clone(), 0.0);
                continue;
            }
            let dampened = (stake as f64).powf(self.config.stake_dampening);
            weights.insert(id.clone(), dampened * (0.5 + trust));
        }
        let total: f64 = weights.values().sum();
        if total > 0.0 {
            for weight in weights.values_mut() {
                *weight /= total;
            }
        }
        weights
    }

    /// Updates trust from each validator's mean absolute deviation against
    /// the final consensus. Non-participants decay instead.
    fn update_trust(
        &mut self,
        validator_scores: &BTreeMap<String, Vec<f64>>,
        consensus: &BTreeMap<String, f64>,
        miner_ids: &[String],
        current_epoch: u64,
    ) {
        let rate = self.config.trust_update_rate;
        for (id, entry) in self.trust.iter_mut() {
            match validator_scores.get(id) {
                Some(scores) => {
                    let mut deviations = Vec::with_capacity(miner_ids.len());
                    for (miner_index, miner_id) in miner_ids.iter().enumerate() {
                        if let (Some(score), Some(consensus_score)) =
                            (scores.get(miner_index), consensus.get(miner_id))
                        {
                            deviations.push((score - consensus_score).abs());
                        }
                    }
                    if deviations.is_empty() {
                        entry.trust *= self.config.trust_decay_rate;
                    } else {
                        let deviation =
                            deviations.iter().sum::<f64>() / deviations.len() as f64;
                        entry.avg_deviation =
                            rate * deviation + (1.0 - rate) * entry.avg_deviation;
                        let target = (1.0 - deviation.min(1.0)).max(0.0);
                        entry.trust = rate * target + (1.0 - rate) * entry.trust;
                    }
                }
                None => {
                    entry.trust *= self.config.trust_decay_rate;
                }
            }
            entry.trust = entry.trust.clamp(self.config.min_trust, 1.0);
            entry.last_updated_epoch = current_epoch;
        }
    }
}

/// The deterministic aggregation core: outlier suppression, weighted
/// aggregation, and the bonding curve, as a pure function of the raw
/// scores and the normalized weights. Both consensus calculation and
/// fraud-proof recomputation call through here, so a commitment carrying
/// its weights can be re-verified exactly by any party.
pub fn aggregate_scores(
    config: &ScoringConfig,
    validator_scores: &BTreeMap<String, Vec<f64>>,
    weights: &BTreeMap<String, f64>,
    miner_ids: &[String],
) -> BTreeMap<String, f64> {
    let filtered = filter_outliers(config, validator_scores, miner_ids.len());

    let mut consensus = BTreeMap::new();
    for (miner_index, miner_id) in miner_ids.iter().enumerate() {
        let mut column: Vec<(f64, f64)> = Vec::new();
        for (validator_id, scores) in &filtered {
            if let (Some(score), Some(weight)) =
                (scores.get(miner_index), weights.get(validator_id))
            {
                column.push((*score, *weight));
            }
        }
        if column.is_empty() {
            consensus.insert(miner_id.clone(), 0.0);
            continue;
        }
        let aggregated = if config.use_weighted_median {
            weighted_median(&mut column)
        } else {
            weighted_mean(&column)
        };
        consensus.insert(miner_id.clone(), apply_bonding_curve(config, aggregated));
    }
    consensus
}

/// Replaces per-miner outliers with the column median. A column needs at
/// least three scores and non-zero spread for suppression to apply.
fn filter_outliers(
    config: &ScoringConfig,
    validator_scores: &BTreeMap<String, Vec<f64>>,
    miner_count: usize,
) -> BTreeMap<String, Vec<f64>> {
    let mut filtered = validator_scores.clone();

    for miner_index in 0..miner_count {
        let column: Vec<f64> = validator_scores
            .values()
            .filter_map(|scores| scores.get(miner_index))
            .copied()
            .collect();
        if column.len() < 3 {
            continue;
        }
        let mean = column.iter().sum::<f64>() / column.len() as f64;
        let variance =
            column.iter().map(|s| (s - mean) * (s - mean)).sum::<f64>() / column.len() as f64;
        let std = variance.sqrt();
        if std == 0.0 {
            continue;
        }
        let lower = mean - config.outlier_threshold_std * std;
        let upper = mean + config.outlier_threshold_std * std;
        let median = median_of(&column);

        for (validator_id, scores) in filtered.iter_mut() {
            if let Some(score) = scores.get_mut(miner_index) {
                if *score < lower || *score > upper {
                    debug!(
                        target: "scoring",
                        validator = %validator_id,
                        miner_index,
                        outlier = *score,
                        median,
                        "suppressed outlier score"
                    );
                    *score = median;
                }
            }
        }
    }
    filtered
}

/// `f(x) = x^alpha`, clamped to `[0, 1]`.
fn apply_bonding_curve(config: &ScoringConfig, score: f64) -> f64 {
    score.clamp(0.0, 1.0).powf(config.bonding_curve_alpha)
}

/// Weighted median: the smallest score whose cumulative weight reaches half
/// of the total. Robust to extreme scores in a way the mean is not.
fn weighted_median(column: &mut [(f64, f64)]) -> f64 {
    if column.is_empty() {
        return 0.0;
    }
    column.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    let total: f64 = column.iter().map(|(_, w)| w).sum();
    if total == 0.0 {
        return 0.0;
    }
    let mut cumulative = 0.0;
    for (score, weight) in column.iter() {
        cumulative += weight;
        if cumulative >= total / 2.0 {
            return *score;
        }
    }
    column.last().map(|(s, _)| *s).unwrap_or(0.0)
}

fn weighted_mean(column: &[(f64, f64)]) -> f64 {
    let total: f64 = column.iter().map(|(_, w)| w).sum();
    if total == 0.0 {
        return 0.0;
    }
    column.iter().map(|(s, w)| s * w).sum::<f64>() / total
}

fn median_of(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted.get(mid).copied().unwrap_or(0.0)
    } else {
        let low = sorted.get(mid - 1).copied().unwrap_or(0.0);
        let high = sorted.get(mid).copied().unwrap_or(0.0);
        (low + high) / 2.0
    }
}

use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::app_config::QaConfig;
use crate::ledger::UnitStatus;
use crate::segments::CanonicalUnit;

use super::checks::{QaChecks, QaReason};

/// Pass/fail outcome of a sampled unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QaVerdict {
    Pass,
    Fail,
}

/// One validated sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaSampleRecord {
    pub content_hash: String,
    pub source_text: String,
    pub translated_text: String,
    pub verdict: QaVerdict,
    pub reasons: Vec<QaReason>,
    pub script_ratio: f64,
    pub length_ratio: f64,
}

impl QaSampleRecord {
    pub fn passed(&self) -> bool {
        self.verdict == QaVerdict::Pass
    }
}

/// Summary of a QA pass over the succeeded units
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QaReport {
    pub sampled: usize,
    pub passed: usize,
    /// Every sampled record, ordered by content hash
    pub records: Vec<QaSampleRecord>,
}

impl QaReport {
    /// Failed samples only
    pub fn failures(&self) -> Vec<QaSampleRecord> {
        self.records.iter().filter(|r| !r.passed()).cloned().collect()
    }

    /// Share of samples that passed; 1.0 when nothing was sampled
    pub fn pass_rate(&self) -> f64 {
        pass_rate(self.sampled, self.passed)
    }
}

pub fn pass_rate(sampled: usize, passed: usize) -> f64 {
    if sampled == 0 {
        1.0
    } else {
        passed as f64 / sampled as f64
    }
}

/// Deterministic sampler over succeeded units
#[derive(Debug, Clone)]
pub struct QaSampler {
    checks: QaChecks,
    sample_rate: f64,
    min_samples: usize,
    seed: u64,
}

impl QaSampler {
    pub fn new(checks: QaChecks, sample_rate: f64, min_samples: usize, seed: u64) -> Self {
        Self {
            checks,
            sample_rate,
            min_samples,
            seed,
        }
    }

    pub fn from_config(config: &QaConfig, seed: u64) -> anyhow::Result<Self> {
        let checks = QaChecks {
            target_script: config.target_script.parse()?,
            min_script_ratio: config.min_script_ratio,
            min_length_ratio: config.min_length_ratio,
            max_length_ratio: config.max_length_ratio,
        };
        Ok(Self::new(checks, config.sample_rate, config.min_samples, seed))
    }

    /// Number of samples drawn from `n` units
    pub fn sample_size(&self, n: usize, rate: f64) -> usize {
        let by_rate = (n as f64 * rate.clamp(0.0, 1.0)).ceil() as usize;
        by_rate.max(self.min_samples.min(n)).min(n)
    }

    /// Pick a reproducible subset of the succeeded units.
    ///
    /// Candidates are ordered by content hash before drawing, so the subset
    /// depends only on the seed, the rate and the set of succeeded units.
    pub fn sample<'a>(&self, units: &'a [CanonicalUnit], rate: f64) -> Vec<&'a CanonicalUnit> {
        let mut candidates: Vec<&CanonicalUnit> = units
            .iter()
            .filter(|u| u.status == UnitStatus::Succeeded)
            .collect();
        candidates.sort_by(|a, b| a.content_hash.cmp(&b.content_hash));

        let amount = self.sample_size(candidates.len(), rate);
        if amount == 0 {
            return Vec::new();
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut picked = rand::seq::index::sample(&mut rng, candidates.len(), amount).into_vec();
        picked.sort_unstable();

        picked.into_iter().map(|i| candidates[i]).collect()
    }

    /// Run every check against one unit
    pub fn validate(&self, unit: &CanonicalUnit) -> QaSampleRecord {
        let translated = unit.translated_text.clone().unwrap_or_default();
        let outcome = self.checks.run(&unit.source_text, &translated);

        let verdict = if outcome.reasons.is_empty() {
            QaVerdict::Pass
        } else {
            debug!(
                "QA failed for {}: {:?}",
                &unit.content_hash[..unit.content_hash.len().min(12)],
                outcome.reasons
            );
            QaVerdict::Fail
        };

        QaSampleRecord {
            content_hash: unit.content_hash.clone(),
            source_text: unit.source_text.clone(),
            translated_text: translated,
            verdict,
            reasons: outcome.reasons,
            script_ratio: outcome.script_ratio,
            length_ratio: outcome.length_ratio,
        }
    }

    /// Sample at the configured rate and validate every sample
    pub fn run(&self, units: &[CanonicalUnit]) -> QaReport {
        let records: Vec<QaSampleRecord> = self
            .sample(units, self.sample_rate)
            .into_iter()
            .map(|unit| self.validate(unit))
            .collect();
        let passed = records.iter().filter(|r| r.passed()).count();

        info!("QA sampled {} units, {} passed", records.len(), passed);

        QaReport {
            sampled: records.len(),
            passed,
            records,
        }
    }
}

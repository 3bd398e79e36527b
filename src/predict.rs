//! Converts per-runner model outputs into a ranked, tie-aware prediction record.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::cache::TrainOutcome;
use crate::data::RaceId;
use crate::normalize::NormalizedSeed;

pub const PREDICTION_VERSION: u32 = 1;

/// Predicted values quantized at this precision are considered tied.
const GROUP_PRECISION: f64 = 1e-9;

/// A prediction is valid only for the exact combination of race, schema versions and dataset
/// horizon it was computed under; any staler stored record must be regenerated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PredictionKey {
    pub race_id: RaceId,
    pub earliest_date: NaiveDate,
    pub prediction_version: u32,
    pub seed_version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub race_id: RaceId,
    pub earliest_date: NaiveDate,
    pub prediction_version: u32,
    pub seed_version: u32,
    /// Pick-groups of saddlecloth numbers, best first, tied runners grouped; [None] when no
    /// model could be trained for the race's segment.
    pub ranked_groups: Option<Vec<Vec<u8>>>,
    pub score: Option<f64>,
    pub train_samples: Option<usize>,
    pub test_samples: Option<usize>,
}
impl Prediction {
    pub fn key(&self) -> PredictionKey {
        PredictionKey {
            race_id: self.race_id,
            earliest_date: self.earliest_date,
            prediction_version: self.prediction_version,
            seed_version: self.seed_version,
        }
    }

    pub fn confidence(&self) -> Option<f64> {
        Some(self.score? * self.test_samples? as f64)
    }
}

/// Scores every runner's normalized vector against the segment's model entry and groups runners
/// by predicted finishing position, ascending (lower is better). Deterministic for a given model
/// entry and seed set.
pub fn aggregate(
    race_id: RaceId,
    earliest_date: NaiveDate,
    seed_version: u32,
    outcome: &TrainOutcome,
    seeds: &[NormalizedSeed],
) -> Prediction {
    let (ranked_groups, score, train_samples, test_samples) = match outcome {
        TrainOutcome::InsufficientData => (None, None, None, None),
        TrainOutcome::Trained(entry) => {
            let mut groups: BTreeMap<i64, Vec<u8>> = BTreeMap::new();
            // A degenerate fit can emit NaN, which cannot be ordered; such runners form a
            // trailing group behind every ranked one.
            let mut unordered = vec![];
            for seed in seeds {
                let predicted = entry.model.predict(&seed.normalized_values);
                if predicted.is_nan() {
                    unordered.push(seed.number);
                } else {
                    groups
                        .entry(quantize(predicted))
                        .or_default()
                        .push(seed.number);
                }
            }
            let mut ranked: Vec<Vec<u8>> = groups
                .into_values()
                .map(|mut group| {
                    group.sort_unstable();
                    group
                })
                .collect();
            if !unordered.is_empty() {
                unordered.sort_unstable();
                ranked.push(unordered);
            }
            (
                Some(ranked),
                Some(entry.score),
                Some(entry.train_samples),
                Some(entry.test_samples),
            )
        }
    };
    Prediction {
        race_id,
        earliest_date,
        prediction_version: PREDICTION_VERSION,
        seed_version,
        ranked_groups,
        score,
        train_samples,
        test_samples,
    }
}

fn quantize(value: f64) -> i64 {
    (value / GROUP_PRECISION).round() as i64
}

//! Race-relative imputation and normalization of seeds.
//!
//! Both steps are relative to the complete set of sibling seeds of one race, so every sibling's
//! `raw_values` must exist before any seed is normalized. Missing slots are imputed with the mean
//! of the siblings that do have a value; a slot nobody has degrades to [NEUTRAL_VALUE]. Each slot
//! is then min-max rescaled to [0, 1] across the race, with zero-variance slots pinned to
//! [NEUTRAL_VALUE] for every runner.

use crate::data::RunnerId;
use crate::seed::Seed;

/// Scale midpoint, used wherever a race supplies no signal for a slot.
pub const NEUTRAL_VALUE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSeed {
    pub runner_id: RunnerId,
    pub number: u8,
    pub result: Option<f64>,
    pub fixed_values: Vec<f64>,
    pub normalized_values: Vec<f64>,
}

/// Imputes and rescales all seeds of one race. The output order matches the input order.
pub fn normalize_race(seeds: &[Seed]) -> Vec<NormalizedSeed> {
    if seeds.is_empty() {
        return vec![];
    }
    let slots = seeds[0].raw_values.len();
    debug_assert!(seeds
        .iter()
        .all(|seed| seed.raw_values.len() == slots));

    let mut fixed: Vec<Vec<f64>> = (0..seeds.len()).map(|_| Vec::with_capacity(slots)).collect();
    for slot in 0..slots {
        let fill = slot_mean(seeds, slot).unwrap_or(NEUTRAL_VALUE);
        for (seed_index, seed) in seeds.iter().enumerate() {
            fixed[seed_index].push(seed.raw_values[slot].unwrap_or(fill));
        }
    }

    let mut normalized: Vec<Vec<f64>> = fixed.clone();
    for slot in 0..slots {
        let (mut min, mut max) = (f64::INFINITY, f64::NEG_INFINITY);
        for values in &fixed {
            min = f64::min(min, values[slot]);
            max = f64::max(max, values[slot]);
        }
        for values in &mut normalized {
            values[slot] = if max > min {
                (values[slot] - min) / (max - min)
            } else {
                NEUTRAL_VALUE
            };
        }
    }

    seeds
        .iter()
        .zip(fixed)
        .zip(normalized)
        .map(|((seed, fixed_values), normalized_values)| NormalizedSeed {
            runner_id: seed.runner_id,
            number: seed.number,
            result: seed.result,
            fixed_values,
            normalized_values,
        })
        .collect()
}

fn slot_mean(seeds: &[Seed], slot: usize) -> Option<f64> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for seed in seeds {
        if let Some(value) = seed.raw_values[slot] {
            sum += value;
            count += 1;
        }
    }
    match count {
        0 => None,
        count => Some(sum / count as f64),
    }
}

//! Fixtures and stub fitters shared across test modules.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::data::{CareerFigures, Race, Runner, RunnerId, TrackCondition};
use crate::model::{Fitter, Model, TrainingPair};
use crate::seed::{Seed, SEED_VERSION};

pub fn race_fixture(
    id: u64,
    date: &str,
    track_condition: TrackCondition,
    runners: Vec<Runner>,
) -> Race {
    Race {
        id,
        date: date.parse().unwrap(),
        venue: "Flemington".into(),
        race_number: id as u8,
        start_time: None,
        entry_conditions: vec!["open".into()],
        track_condition,
        importance: 1.0,
        runners,
    }
}

pub fn runner_fixture(id: RunnerId, number: u8, result: Option<u8>) -> Runner {
    Runner {
        id,
        number,
        barrier: None,
        weight: None,
        carrying: None,
        age: None,
        spell: None,
        up: None,
        jockey_id: None,
        starting_price: None,
        prize_money: None,
        result,
        career: CareerFigures::default(),
        performances: Default::default(),
    }
}

pub fn seed_fixture(runner_id: RunnerId, number: u8, raw_values: Vec<Option<f64>>) -> Seed {
    Seed {
        runner_id,
        number,
        seed_version: SEED_VERSION,
        result: None,
        raw_values,
    }
}

struct ConstModel(f64);
impl Model for ConstModel {
    fn predict(&self, _: &[f64]) -> f64 {
        self.0
    }
}

/// Fits a constant model at the weighted mean of the observations, counting invocations.
pub struct MeanFitter {
    fits: Arc<AtomicUsize>,
}
impl MeanFitter {
    pub fn new(fits: Arc<AtomicUsize>) -> Self {
        Self { fits }
    }
}
impl Fitter for MeanFitter {
    fn name(&self) -> &'static str {
        "mean"
    }

    fn fit(&self, pairs: &[TrainingPair]) -> anyhow::Result<Box<dyn Model>> {
        self.fits.fetch_add(1, Ordering::Relaxed);
        let weight_sum: f64 = pairs.iter().map(|pair| pair.weight).sum();
        anyhow::ensure!(weight_sum > 0.0, "no weighted training pairs");
        let mean = pairs
            .iter()
            .map(|pair| pair.weight * pair.observed)
            .sum::<f64>()
            / weight_sum;
        Ok(Box::new(ConstModel(mean)))
    }
}

pub struct FailingFitter;
impl Fitter for FailingFitter {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn fit(&self, _: &[TrainingPair]) -> anyhow::Result<Box<dyn Model>> {
        anyhow::bail!("deliberate fitting failure")
    }
}

/// Reports a preset held-out score and predicts a preset tag value.
pub struct FixedScoreFitter {
    name: &'static str,
    score: f64,
    tag: f64,
}
impl FixedScoreFitter {
    pub fn new(name: &'static str, score: f64, tag: f64) -> Self {
        Self { name, score, tag }
    }
}
impl Fitter for FixedScoreFitter {
    fn name(&self) -> &'static str {
        self.name
    }

    fn fit(&self, _: &[TrainingPair]) -> anyhow::Result<Box<dyn Model>> {
        Ok(Box::new(ConstModel(self.tag)))
    }

    fn score(&self, _: &dyn Model, _: &[TrainingPair]) -> f64 {
        self.score
    }
}

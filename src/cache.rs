//! Segment-keyed model cache.
//!
//! Workers processing races of the same condition-segment share one trained model. The first
//! caller for an uncached segment (the leader) writes a placeholder under the lock, then trains
//! outside it; callers that find the placeholder (followers) poll until the leader publishes an
//! entry or removes the placeholder. The lock is held only for the check-and-placeholder step and
//! for publication, so unrelated segments train concurrently.
//!
//! The train/held-out partition is drawn from a seedable RNG; unseeded runs are deliberately not
//! reproducible across processes.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rustc_hash::FxHashMap;
use thiserror::Error;
use tinyrand::{Rand, Seeded, StdRand};
use tracing::debug;

use crate::data::Segment;
use crate::model::{Fitter, Model, TrainingPair};

/// Fraction of comparable races withheld from training and used to score the fit.
pub const TEST_FRACTION: f64 = 0.2;

/// Fewer comparable races than this (one over [TEST_FRACTION]) cannot produce a meaningful
/// held-out sample, so no model is trained.
pub const MIN_COMPARABLE_RACES: usize = 5;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// The labelled runners of one comparable historical race.
pub struct RaceSample {
    pub pairs: Vec<TrainingPair>,
}

pub struct ModelEntry {
    pub model: Box<dyn Model>,
    pub fitter: &'static str,
    pub score: f64,
    pub train_samples: usize,
    pub test_samples: usize,
}

#[derive(Clone)]
pub enum TrainOutcome {
    Trained(Arc<ModelEntry>),
    /// A first-class outcome, not an error: too few comparable races to train from.
    InsufficientData,
}

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("historical supplier failed for segment {segment}: {source}")]
    Supplier {
        segment: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("model fitting failed for segment {segment}: {source}")]
    Fit {
        segment: String,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Clone)]
enum Slot {
    /// A leader is training this segment.
    Pending,
    Ready(Arc<ModelEntry>),
}

pub struct SegmentModelCache {
    slots: Mutex<FxHashMap<Segment, Slot>>,
    fitters: Vec<Box<dyn Fitter>>,
    rand: Mutex<StdRand>,
    poll_interval: Duration,
}
impl SegmentModelCache {
    pub fn new(fitters: Vec<Box<dyn Fitter>>, rand_seed: u64) -> Self {
        Self {
            slots: Mutex::default(),
            fitters,
            rand: Mutex::new(StdRand::seed(rand_seed)),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Returns the model entry for `segment`, training it from the supplied comparable races if
    /// no caller has done so since the last invalidation. `supply` is invoked by at most one
    /// caller per cache lifetime per segment.
    pub fn get_or_train<F>(&self, segment: &Segment, supply: F) -> Result<TrainOutcome, TrainError>
    where
        F: FnOnce() -> anyhow::Result<Vec<RaceSample>>,
    {
        let leader = {
            let mut slots = self.slots.lock().unwrap();
            match slots.get(segment) {
                Some(Slot::Ready(entry)) => return Ok(TrainOutcome::Trained(entry.clone())),
                Some(Slot::Pending) => false,
                None => {
                    slots.insert(segment.clone(), Slot::Pending);
                    true
                }
            }
        };
        if leader {
            self.lead(segment, supply)
        } else {
            self.follow(segment)
        }
    }

    /// Drops every cached entry. Intended as a barrier between processing batches: must not run
    /// concurrently with an in-flight [get_or_train](Self::get_or_train).
    pub fn invalidate_all(&self) {
        self.slots.lock().unwrap().clear();
    }

    fn lead<F>(&self, segment: &Segment, supply: F) -> Result<TrainOutcome, TrainError>
    where
        F: FnOnce() -> anyhow::Result<Vec<RaceSample>>,
    {
        let samples = match supply() {
            Ok(samples) => samples,
            Err(source) => {
                self.remove(segment);
                return Err(TrainError::Supplier {
                    segment: segment.to_string(),
                    source,
                });
            }
        };
        if samples.len() < MIN_COMPARABLE_RACES {
            debug!(
                "segment {segment}: {} comparable races, need {MIN_COMPARABLE_RACES}",
                samples.len()
            );
            self.remove(segment);
            return Ok(TrainOutcome::InsufficientData);
        }
        match self.train(segment, samples) {
            Ok(entry) => {
                let entry = Arc::new(entry);
                self.slots
                    .lock()
                    .unwrap()
                    .insert(segment.clone(), Slot::Ready(entry.clone()));
                Ok(TrainOutcome::Trained(entry))
            }
            Err(source) => {
                // Roll the slot back to absent so a later call may retry.
                self.remove(segment);
                Err(TrainError::Fit {
                    segment: segment.to_string(),
                    source,
                })
            }
        }
    }

    fn follow(&self, segment: &Segment) -> Result<TrainOutcome, TrainError> {
        loop {
            {
                let slots = self.slots.lock().unwrap();
                match slots.get(segment) {
                    Some(Slot::Ready(entry)) => return Ok(TrainOutcome::Trained(entry.clone())),
                    Some(Slot::Pending) => {}
                    // The leader failed or found insufficient data.
                    None => return Ok(TrainOutcome::InsufficientData),
                }
            }
            thread::sleep(self.poll_interval);
        }
    }

    fn train(&self, segment: &Segment, samples: Vec<RaceSample>) -> anyhow::Result<ModelEntry> {
        let mut indices: Vec<usize> = (0..samples.len()).collect();
        let mut rand = {
            let mut shared = self.rand.lock().unwrap();
            StdRand::seed(shared.next_u64())
        };
        for index in (1..indices.len()).rev() {
            let other = rand.next_u64() as usize % (index + 1);
            indices.swap(index, other);
        }
        let test_races = ((samples.len() as f64 * TEST_FRACTION).round() as usize)
            .clamp(1, samples.len() - 1);

        let mut train_pairs = vec![];
        let mut test_pairs = vec![];
        for (position, &sample_index) in indices.iter().enumerate() {
            let pairs = &samples[sample_index].pairs;
            if position < test_races {
                test_pairs.extend_from_slice(pairs);
            } else {
                train_pairs.extend_from_slice(pairs);
            }
        }
        if train_pairs.is_empty() || test_pairs.is_empty() {
            anyhow::bail!("no labelled runners among comparable races");
        }

        let mut best: Option<ModelEntry> = None;
        for fitter in &self.fitters {
            let model = fitter.fit(&train_pairs)?;
            let score = fitter.score(model.as_ref(), &test_pairs);
            debug!(
                "segment {segment}: {} scored {score:.6} ({} train, {} test)",
                fitter.name(),
                train_pairs.len(),
                test_pairs.len()
            );
            if best.as_ref().map_or(true, |entry| score > entry.score) {
                best = Some(ModelEntry {
                    model,
                    fitter: fitter.name(),
                    score,
                    train_samples: train_pairs.len(),
                    test_samples: test_pairs.len(),
                });
            }
        }
        best.ok_or_else(|| anyhow::anyhow!("no fitters configured"))
    }

    fn remove(&self, segment: &Segment) {
        self.slots.lock().unwrap().remove(segment);
    }

    #[cfg(test)]
    fn cached(&self, segment: &Segment) -> bool {
        self.slots.lock().unwrap().contains_key(segment)
    }
}

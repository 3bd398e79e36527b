//! Batch driver: processes one calendar date at a time, fanning the date's races out over a
//! fixed-size worker pool. The segment model cache is invalidated at each date boundary, because
//! every processed date grows the historical dataset underlying the cached models.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::anyhow;
use chrono::NaiveDate;
use tracing::{info, warn};

use crate::cache::{RaceSample, SegmentModelCache, TrainError};
use crate::data::{HistoricalSupplier, Race, RaceId, RaceStore, RunnerId, Segment};
use crate::model::{Fitter, TrainingPair};
use crate::normalize::{normalize_race, NormalizedSeed};
use crate::predict::{aggregate, Prediction, PredictionKey, PREDICTION_VERSION};
use crate::seed::{JockeyFigureCache, Seed, SeedKey, SEED_VERSION};
use crate::store::{KeyedStore, MemoryStore};

pub struct BatchOptions {
    pub workers: usize,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
}

pub struct BatchSummary {
    /// Predictions in (date, venue, race number) order.
    pub predictions: Vec<(Arc<Race>, Arc<Prediction>)>,
    /// Races whose prediction failed; the batch continues past them.
    pub failures: usize,
}

pub struct Engine {
    races: Arc<RaceStore>,
    cache: SegmentModelCache,
    jockeys: JockeyFigureCache,
    seeds: MemoryStore<SeedKey, Seed>,
    predictions: MemoryStore<PredictionKey, Prediction>,
}
impl Engine {
    pub fn new(races: Arc<RaceStore>, fitters: Vec<Box<dyn Fitter>>, rand_seed: u64) -> Self {
        Self {
            races,
            cache: SegmentModelCache::new(fitters, rand_seed),
            jockeys: JockeyFigureCache::default(),
            seeds: MemoryStore::default(),
            predictions: MemoryStore::default(),
        }
    }

    /// Predicts every race between the two dates inclusive. Per-race failures are logged and
    /// counted; an unreachable historical supplier aborts the whole batch.
    pub fn process_dates(&self, options: &BatchOptions) -> anyhow::Result<BatchSummary> {
        anyhow::ensure!(options.workers >= 1, "at least one worker is required");
        anyhow::ensure!(
            options.date_from <= options.date_to,
            "date range {} to {} is inverted",
            options.date_from,
            options.date_to
        );

        let mut predictions = vec![];
        let mut failures = 0;
        let mut date = options.date_from;
        loop {
            let races = self.races.races_on(date);
            if !races.is_empty() {
                self.begin_batch();
                info!("predicting {} races on {date}", races.len());
                for (race, result) in self.process_races(&races, options.workers) {
                    match result {
                        Ok(prediction) => predictions.push((race, prediction)),
                        Err(err) if is_supplier_failure(&err) => {
                            return Err(err.context("aborting batch: historical supplier failed"));
                        }
                        Err(err) => {
                            warn!(
                                "no prediction for {} race {} on {date}: {err:?}",
                                race.venue, race.race_number
                            );
                            failures += 1;
                        }
                    }
                }
            }
            if date >= options.date_to {
                break;
            }
            date = date
                .succ_opt()
                .ok_or_else(|| anyhow!("date overflow after {date}"))?;
        }

        predictions.sort_by(|(a, _), (b, _)| {
            (a.date, &a.venue, a.race_number).cmp(&(b.date, &b.venue, b.race_number))
        });
        Ok(BatchSummary {
            predictions,
            failures,
        })
    }

    /// The begin-batch barrier: no tasks from a previous date are in flight when this runs.
    /// Records persisted under a superseded schema version are purged before the date's work
    /// begins; they can only mislead a later lookup.
    fn begin_batch(&self) {
        self.cache.invalidate_all();
        self.seeds.retain(|key, _| key.seed_version == SEED_VERSION);
        self.predictions.retain(|key, _| {
            key.prediction_version == PREDICTION_VERSION && key.seed_version == SEED_VERSION
        });
    }

    fn process_races(
        &self,
        races: &[Arc<Race>],
        workers: usize,
    ) -> Vec<(Arc<Race>, anyhow::Result<Arc<Prediction>>)> {
        let cursor = AtomicUsize::new(0);
        let results = Mutex::new(Vec::with_capacity(races.len()));
        thread::scope(|scope| {
            for _ in 0..workers.min(races.len()) {
                scope.spawn(|| loop {
                    let index = cursor.fetch_add(1, Ordering::Relaxed);
                    let Some(race) = races.get(index) else {
                        break;
                    };
                    let result = self.predict_race(race);
                    results.lock().unwrap().push((race.clone(), result));
                });
            }
        });
        results.into_inner().unwrap()
    }

    /// Returns the stored prediction for the race if one exists under the current versions and
    /// dataset horizon, generating and storing it otherwise.
    pub fn predict_race(&self, race: &Race) -> anyhow::Result<Arc<Prediction>> {
        let earliest_date = self
            .races
            .earliest_date()
            .ok_or_else(|| anyhow!("the race dataset is empty"))?;
        let key = PredictionKey {
            race_id: race.id,
            earliest_date,
            prediction_version: PREDICTION_VERSION,
            seed_version: SEED_VERSION,
        };
        self.predictions.find_or_create(&key, || {
            let seeds = self.race_seeds(race)?;
            let segment = race.segment();
            let outcome = self
                .cache
                .get_or_train(&segment, || self.segment_samples(&segment, race.date))?;
            Ok(aggregate(
                race.id,
                earliest_date,
                SEED_VERSION,
                &outcome,
                &seeds,
            ))
        })
    }

    /// Builds (or fetches) the seed of every runner in the race, then normalizes them against
    /// each other. Siblings must all exist before normalization, so this is the only entry point
    /// to a race's seeds.
    fn race_seeds(&self, race: &Race) -> anyhow::Result<Vec<NormalizedSeed>> {
        let mut seeds = Vec::with_capacity(race.runners.len());
        for runner in &race.runners {
            let key = SeedKey {
                runner_id: runner.id,
                seed_version: SEED_VERSION,
            };
            let seed = self.seeds.find_or_create(&key, || {
                Ok(Seed::build(race, runner, &self.jockeys, self.races.as_ref()))
            })?;
            seeds.push((*seed).clone());
        }
        Ok(normalize_race(&seeds))
    }

    /// Drops the stored seed of a deleted runner.
    pub fn forget_runner(&self, runner_id: RunnerId) -> bool {
        self.seeds.remove(&SeedKey {
            runner_id,
            seed_version: SEED_VERSION,
        })
    }

    /// Drops any stored prediction of a deleted race.
    pub fn forget_race(&self, race_id: RaceId) {
        self.predictions.retain(|key, _| key.race_id != race_id);
    }

    fn segment_samples(
        &self,
        segment: &Segment,
        before: NaiveDate,
    ) -> anyhow::Result<Vec<RaceSample>> {
        let comparable = self.races.comparable_races(segment, before)?;
        let mut samples = Vec::with_capacity(comparable.len());
        for race in comparable {
            let pairs = self
                .race_seeds(&race)?
                .into_iter()
                .filter_map(|seed| {
                    seed.result.map(|observed| TrainingPair {
                        input: seed.normalized_values,
                        observed,
                        weight: race.importance,
                    })
                })
                .collect();
            samples.push(RaceSample { pairs });
        }
        Ok(samples)
    }
}

fn is_supplier_failure(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<TrainError>(),
        Some(TrainError::Supplier { .. })
    )
}

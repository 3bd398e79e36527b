//! Builds a runner's versioned feature vector ("seed") from its historical statistics.
//!
//! A seed's `raw_values` carry one optional number per slot in a fixed, stable order; anything
//! that cannot be computed from the available history stays [None] so that downstream imputation
//! can tell "unknown" apart from zero. The slot order is part of the schema: changing it requires
//! a [SEED_VERSION] bump, which invalidates previously persisted seeds.

use std::sync::RwLock;

use chrono::NaiveDate;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use strum::{EnumCount, IntoEnumIterator};

use crate::data::{
    Category, JockeyId, Race, RideHistory, RideRecord, Runner, RunnerId, TrackCondition,
};

pub const SEED_VERSION: u32 = 6;

/// Slots preceding the per-category aggregates: seven raw attributes, three runner career
/// figures, and two jockey career money figures.
const STATIC_SLOTS: usize = 12;

/// Static slots, then four runner aggregates per category, then four jockey aggregates per
/// category.
pub fn feature_count() -> usize {
    STATIC_SLOTS + 8 * Category::COUNT
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeedKey {
    pub runner_id: RunnerId,
    pub seed_version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seed {
    pub runner_id: RunnerId,
    pub number: u8,
    pub seed_version: u32,
    pub result: Option<f64>,
    pub raw_values: Vec<Option<f64>>,
}
impl Seed {
    pub fn key(&self) -> SeedKey {
        SeedKey {
            runner_id: self.runner_id,
            seed_version: self.seed_version,
        }
    }

    /// Builds the seed for one runner as of the race date. Pure with respect to the runner's
    /// history; statistics that cannot be derived degrade to [None] rather than failing.
    pub fn build(
        race: &Race,
        runner: &Runner,
        jockeys: &JockeyFigureCache,
        rides: &impl RideHistory,
    ) -> Seed {
        let mut raw_values = Vec::with_capacity(feature_count());
        raw_values.push(Some(f64::from(runner.number)));
        raw_values.push(runner.barrier.map(f64::from));
        raw_values.push(runner.weight);
        raw_values.push(runner.carrying);
        raw_values.push(runner.age.map(f64::from));
        raw_values.push(runner.spell.map(f64::from));
        raw_values.push(runner.up.map(f64::from));

        raw_values.push(runner.career.average_prize_money);
        raw_values.push(runner.career.average_starting_price);
        raw_values.push(runner.career.roi);

        let jockey = runner
            .jockey_id
            .map(|jockey_id| jockeys.figures(jockey_id, race.date, rides));
        match &jockey {
            Some(figures) => {
                raw_values.push(figures.average_prize_money);
                raw_values.push(figures.average_starting_price);
            }
            None => raw_values.extend([None; 2]),
        }

        for category in Category::iter() {
            match runner.performances.get(&category) {
                Some(performance) => {
                    raw_values.push(Some(f64::from(performance.starts)));
                    raw_values.push(performance.win_pct());
                    raw_values.push(performance.place_pct());
                    raw_values.push(performance.expected_pace);
                }
                None => raw_values.extend([None; 4]),
            }
        }

        for category in Category::iter() {
            match jockey
                .as_ref()
                .and_then(|figures| figures.categories.get(&category))
            {
                Some(aggregates) => {
                    raw_values.push(Some(f64::from(aggregates.starts)));
                    raw_values.push(aggregates.win_pct);
                    raw_values.push(aggregates.place_pct);
                    raw_values.push(aggregates.roi);
                }
                None => raw_values.extend([None; 4]),
            }
        }

        debug_assert_eq!(feature_count(), raw_values.len());
        Seed {
            runner_id: runner.id,
            number: runner.number,
            seed_version: SEED_VERSION,
            result: runner.result.map(f64::from),
            raw_values,
        }
    }
}

/// Figures for a jockey, computed over their ride history as of a given date: career money
/// averages plus per-category ride aggregates. Categories whose restriction cannot be derived
/// from ride records alone (distance, venue and preparation context) are absent from the map.
#[derive(Debug, Clone, PartialEq)]
pub struct JockeyFigures {
    pub average_prize_money: Option<f64>,
    pub average_starting_price: Option<f64>,
    pub categories: FxHashMap<Category, RideAggregates>,
}
impl JockeyFigures {
    fn compute(rides: &[RideRecord]) -> Self {
        let average_prize_money = mean(rides.iter().filter_map(|ride| ride.prize_money));
        let average_starting_price = mean(rides.iter().filter_map(|ride| ride.starting_price));
        let mut categories = FxHashMap::default();
        for category in Category::iter() {
            if let Some(slice) = category_rides(category, rides) {
                categories.insert(category, RideAggregates::compute(&slice));
            }
        }
        Self {
            average_prize_money,
            average_starting_price,
            categories,
        }
    }
}

fn category_rides<'a>(
    category: Category,
    rides: &'a [RideRecord],
) -> Option<Vec<&'a RideRecord>> {
    let on_going = |track: TrackCondition| -> Option<Vec<&'a RideRecord>> {
        Some(rides.iter().filter(|ride| ride.track == track).collect())
    };
    match category {
        Category::Career => Some(rides.iter().collect()),
        Category::Firm => on_going(TrackCondition::Firm),
        Category::Good => on_going(TrackCondition::Good),
        Category::Soft => on_going(TrackCondition::Soft),
        Category::Heavy => on_going(TrackCondition::Heavy),
        Category::Synthetic => on_going(TrackCondition::Synthetic),
        Category::AtDistance
        | Category::AtDistanceOnTrack
        | Category::OnTrack
        | Category::OnUp
        | Category::SinceRest
        | Category::WithJockey => None,
    }
}

/// Win/place/return aggregates over one slice of a jockey's rides.
#[derive(Debug, Clone, PartialEq)]
pub struct RideAggregates {
    pub starts: u32,
    pub win_pct: Option<f64>,
    pub place_pct: Option<f64>,
    pub roi: Option<f64>,
}
impl RideAggregates {
    fn compute(rides: &[&RideRecord]) -> Self {
        let starts = rides.len() as u32;
        let completed: Vec<_> = rides.iter().filter_map(|ride| ride.result).collect();
        let (win_pct, place_pct) = if completed.is_empty() {
            (None, None)
        } else {
            let runs = completed.len() as f64;
            let wins = completed.iter().filter(|&&result| result == 1).count();
            let places = completed.iter().filter(|&&result| result <= 3).count();
            (Some(wins as f64 / runs), Some(places as f64 / runs))
        };

        // Flat one-unit win stake: a winner returns price minus the stake, anything else loses it.
        let roi = mean(rides.iter().filter_map(|ride| {
            match (ride.result, ride.starting_price) {
                (Some(1), Some(price)) => Some(price - 1.0),
                (Some(_), Some(_)) => Some(-1.0),
                _ => None,
            }
        }));

        Self {
            starts,
            win_pct,
            place_pct,
            roi,
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for value in values {
        sum += value;
        count += 1;
    }
    match count {
        0 => None,
        count => Some(sum / count as f64),
    }
}

/// Memoizes [JockeyFigures] per (jockey, as-of date) for the lifetime of the process. Concurrent
/// builders may recompute the same entry redundantly; the results are identical, so last write
/// wins.
#[derive(Default)]
pub struct JockeyFigureCache {
    figures: RwLock<FxHashMap<(JockeyId, NaiveDate), JockeyFigures>>,
}
impl JockeyFigureCache {
    pub fn figures(
        &self,
        jockey: JockeyId,
        as_of: NaiveDate,
        history: &impl RideHistory,
    ) -> JockeyFigures {
        if let Some(figures) = self.figures.read().unwrap().get(&(jockey, as_of)) {
            return figures.clone();
        }
        let figures = JockeyFigures::compute(&history.rides(jockey, as_of));
        self.figures
            .write()
            .unwrap()
            .insert((jockey, as_of), figures.clone());
        figures
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.figures.read().unwrap().len()
    }
}

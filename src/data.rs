//! Racing domain entities, the condition-segment key and the in-memory race dataset.

use std::fmt::{Display, Formatter};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::{fs, io};

use chrono::{NaiveDate, NaiveTime};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use strum_macros::{Display as StrumDisplay, EnumCount, EnumIter, EnumString};

pub type RaceId = u64;
pub type RunnerId = u64;
pub type JockeyId = u64;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    StrumDisplay,
    EnumString,
)]
pub enum TrackCondition {
    Firm,
    Good,
    Soft,
    Heavy,
    Synthetic,
}

/// The catalogue of historical slices over which per-runner performance aggregates are kept.
/// Iteration order is the feature order; adding, removing or reordering variants changes the
/// seed schema and requires a [SEED_VERSION](crate::seed::SEED_VERSION) bump.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    StrumDisplay,
    EnumCount,
    EnumIter,
    ordinalizer::Ordinal,
)]
pub enum Category {
    Career,
    AtDistance,
    AtDistanceOnTrack,
    OnTrack,
    OnUp,
    SinceRest,
    WithJockey,
    Firm,
    Good,
    Soft,
    Heavy,
    Synthetic,
}

/// Win/place aggregates over one historical slice. Percentages are undefined (not zero) until at
/// least one start has been recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Performance {
    pub starts: u32,
    pub wins: u32,
    pub places: u32,
    pub expected_pace: Option<f64>,
}
impl Performance {
    pub fn win_pct(&self) -> Option<f64> {
        match self.starts {
            0 => None,
            starts => Some(self.wins as f64 / starts as f64),
        }
    }

    pub fn place_pct(&self) -> Option<f64> {
        match self.starts {
            0 => None,
            starts => Some(self.places as f64 / starts as f64),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CareerFigures {
    pub average_prize_money: Option<f64>,
    pub average_starting_price: Option<f64>,
    pub roi: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runner {
    pub id: RunnerId,
    pub number: u8,
    pub barrier: Option<u8>,
    pub weight: Option<f64>,
    pub carrying: Option<f64>,
    pub age: Option<u8>,
    /// Days since the runner's previous start.
    pub spell: Option<u32>,
    /// Starts into the current preparation.
    pub up: Option<u32>,
    pub jockey_id: Option<JockeyId>,
    pub starting_price: Option<f64>,
    pub prize_money: Option<f64>,
    /// Finishing position, unknown for a race yet to be run.
    pub result: Option<u8>,
    #[serde(default)]
    pub career: CareerFigures,
    #[serde(default)]
    pub performances: FxHashMap<Category, Performance>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Race {
    pub id: RaceId,
    pub date: NaiveDate,
    pub venue: String,
    pub race_number: u8,
    pub start_time: Option<NaiveTime>,
    pub entry_conditions: Vec<String>,
    pub track_condition: TrackCondition,
    /// Training weight applied to every labelled runner of this race.
    #[serde(default = "default_importance")]
    pub importance: f64,
    pub runners: Vec<Runner>,
}
impl Race {
    pub fn segment(&self) -> Segment {
        Segment {
            conditions: self.entry_conditions.clone(),
            track: self.track_condition,
        }
    }
}

fn default_importance() -> f64 {
    1.0
}

/// Groups historically comparable races: the ordered entry-condition tags plus the track
/// condition. Derived on demand, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Segment {
    pub conditions: Vec<String>,
    pub track: TrackCondition,
}
impl Display for Segment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for condition in &self.conditions {
            write!(f, "{condition}|")?;
        }
        write!(f, "{}", self.track)
    }
}

/// Supplies the races historically comparable to a segment, strictly before a cutoff date.
pub trait HistoricalSupplier {
    fn comparable_races(
        &self,
        segment: &Segment,
        before: NaiveDate,
    ) -> anyhow::Result<Vec<Arc<Race>>>;
}

/// One past ride of a jockey, as seen from the runner records.
#[derive(Debug, Clone, PartialEq)]
pub struct RideRecord {
    pub date: NaiveDate,
    pub track: TrackCondition,
    pub result: Option<u8>,
    pub starting_price: Option<f64>,
    pub prize_money: Option<f64>,
}

/// Supplies a jockey's ride history strictly before a cutoff date.
pub trait RideHistory {
    fn rides(&self, jockey: JockeyId, before: NaiveDate) -> Vec<RideRecord>;
}

/// The loaded race dataset, indexed by date.
pub struct RaceStore {
    races: Vec<Arc<Race>>,
    by_date: FxHashMap<NaiveDate, Vec<Arc<Race>>>,
}
impl RaceStore {
    pub fn new(races: Vec<Race>) -> Self {
        let races: Vec<_> = races.into_iter().map(Arc::new).collect();
        let mut by_date: FxHashMap<NaiveDate, Vec<Arc<Race>>> = FxHashMap::default();
        for race in &races {
            by_date.entry(race.date).or_default().push(race.clone());
        }
        Self { races, by_date }
    }

    /// Reads every `.json` race file under `path`, recursing into subdirectories.
    pub fn read_from_dir(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let mut files = vec![];
        recurse_dir(path.as_ref().to_path_buf(), &mut files)?;
        let mut races = Vec::with_capacity(files.len());
        for file in files {
            let race: Race = serde_json::from_reader(File::open(&file)?)?;
            races.push(race);
        }
        Ok(Self::new(races))
    }

    pub fn races_on(&self, date: NaiveDate) -> Vec<Arc<Race>> {
        self.by_date.get(&date).cloned().unwrap_or_default()
    }

    pub fn earliest_date(&self) -> Option<NaiveDate> {
        self.races.iter().map(|race| race.date).min()
    }

    pub fn latest_date(&self) -> Option<NaiveDate> {
        self.races.iter().map(|race| race.date).max()
    }

    pub fn len(&self) -> usize {
        self.races.len()
    }

    pub fn is_empty(&self) -> bool {
        self.races.is_empty()
    }
}
impl HistoricalSupplier for RaceStore {
    fn comparable_races(
        &self,
        segment: &Segment,
        before: NaiveDate,
    ) -> anyhow::Result<Vec<Arc<Race>>> {
        Ok(self
            .races
            .iter()
            .filter(|race| race.date < before && &race.segment() == segment)
            .cloned()
            .collect())
    }
}
impl RideHistory for RaceStore {
    fn rides(&self, jockey: JockeyId, before: NaiveDate) -> Vec<RideRecord> {
        let mut rides = vec![];
        for race in &self.races {
            if race.date >= before {
                continue;
            }
            for runner in &race.runners {
                if runner.jockey_id == Some(jockey) {
                    rides.push(RideRecord {
                        date: race.date,
                        track: race.track_condition,
                        result: runner.result,
                        starting_price: runner.starting_price,
                        prize_money: runner.prize_money,
                    });
                }
            }
        }
        rides
    }
}

fn recurse_dir(path: PathBuf, files: &mut Vec<PathBuf>) -> Result<(), io::Error> {
    let md = fs::metadata(&path)?;
    if md.is_dir() {
        let entries = fs::read_dir(path)?;
        for entry in entries {
            recurse_dir(entry?.path(), files)?;
        }
    } else if path.extension().unwrap_or_default() == "json" {
        files.push(path);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{race_fixture, runner_fixture};

    #[test]
    fn segment_groups_matching_races() {
        let race = race_fixture(1, "2016-04-09", TrackCondition::Good, vec![]);
        let same = race_fixture(2, "2016-03-12", TrackCondition::Good, vec![]);
        let other_track = race_fixture(3, "2016-03-12", TrackCondition::Heavy, vec![]);
        assert_eq!(race.segment(), same.segment());
        assert_ne!(race.segment(), other_track.segment());

        let mut other_conditions = race_fixture(4, "2016-03-12", TrackCondition::Good, vec![]);
        other_conditions.entry_conditions = vec!["3yo+".into()];
        assert_ne!(race.segment(), other_conditions.segment());
    }

    #[test]
    fn segment_display() {
        let mut race = race_fixture(1, "2016-04-09", TrackCondition::Soft, vec![]);
        race.entry_conditions = vec!["maiden".into(), "3yo".into()];
        assert_eq!("maiden|3yo|Soft", race.segment().to_string());
    }

    #[test]
    fn comparable_races_strictly_before_cutoff() {
        let store = RaceStore::new(vec![
            race_fixture(1, "2016-01-02", TrackCondition::Good, vec![]),
            race_fixture(2, "2016-01-09", TrackCondition::Good, vec![]),
            race_fixture(3, "2016-01-16", TrackCondition::Good, vec![]),
            race_fixture(4, "2016-01-09", TrackCondition::Heavy, vec![]),
        ]);
        let segment = store.races_on("2016-01-16".parse().unwrap())[0].segment();
        let comparable = store
            .comparable_races(&segment, "2016-01-16".parse().unwrap())
            .unwrap();
        let ids: Vec<_> = comparable.iter().map(|race| race.id).collect();
        assert_eq!(vec![1, 2], ids);
    }

    #[test]
    fn ride_history_scans_prior_races_only() {
        let mut early = race_fixture(1, "2016-01-02", TrackCondition::Good, vec![]);
        let mut ride = runner_fixture(10, 1, Some(1));
        ride.jockey_id = Some(77);
        early.runners.push(ride);
        let mut late = race_fixture(2, "2016-02-06", TrackCondition::Good, vec![]);
        let mut ride = runner_fixture(11, 1, Some(4));
        ride.jockey_id = Some(77);
        late.runners.push(ride);

        let store = RaceStore::new(vec![early, late]);
        let rides = store.rides(77, "2016-02-01".parse().unwrap());
        assert_eq!(1, rides.len());
        assert_eq!(Some(1), rides[0].result);
        assert_eq!(TrackCondition::Good, rides[0].track);
        assert!(store.rides(78, "2016-03-01".parse().unwrap()).is_empty());
    }

    #[test]
    fn date_index() {
        let store = RaceStore::new(vec![
            race_fixture(1, "2016-01-02", TrackCondition::Good, vec![]),
            race_fixture(2, "2016-01-09", TrackCondition::Good, vec![]),
            race_fixture(3, "2016-01-09", TrackCondition::Soft, vec![]),
        ]);
        assert_eq!(Some("2016-01-02".parse().unwrap()), store.earliest_date());
        assert_eq!(Some("2016-01-09".parse().unwrap()), store.latest_date());
        assert_eq!(2, store.races_on("2016-01-09".parse().unwrap()).len());
        assert!(store.races_on("2016-01-10".parse().unwrap()).is_empty());
    }

    #[test]
    fn race_deserialises_with_defaults() {
        let json = r#"{
            "id": 42,
            "date": "2016-04-09",
            "venue": "Randwick",
            "race_number": 7,
            "start_time": "14:35:00",
            "entry_conditions": ["maiden"],
            "track_condition": "Good",
            "runners": [{
                "id": 1, "number": 4, "barrier": 2, "weight": 56.5, "carrying": null,
                "age": 4, "spell": 21, "up": 2, "jockey_id": 9, "starting_price": 3.1,
                "prize_money": 12000.0, "result": 1
            }]
        }"#;
        let race: Race = serde_json::from_str(json).unwrap();
        assert_eq!(1.0, race.importance);
        assert_eq!(TrackCondition::Good, race.track_condition);
        let runner = &race.runners[0];
        assert!(runner.performances.is_empty());
        assert_eq!(CareerFigures::default(), runner.career);
    }
}

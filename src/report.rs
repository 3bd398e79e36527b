//! Prediction report output: one CSV row per race and a console summary table.

use std::fs::File;
use std::io;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use stanza::style::{HAlign, Header, MinWidth, Styles};
use stanza::table::{Col, Row, Table};

use crate::data::Race;
use crate::predict::Prediction;

/// Ranked groups beyond this many are not reported.
const REPORTED_GROUPS: usize = 4;

const HEADER: [&str; 9] = [
    "date", "venue", "race", "time", "group_1", "group_2", "group_3", "group_4", "confidence",
];

pub struct CsvWriter {
    writer: BufWriter<File>,
}
impl CsvWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, io::Error> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        Ok(Self { writer })
    }

    pub fn append<R>(&mut self, record: R) -> Result<(), io::Error>
    where
        R: IntoIterator,
        R::Item: AsRef<str>,
    {
        let mut first = true;
        for datum in record {
            if first {
                first = false;
            } else {
                self.writer.write_all(b",")?;
            }
            self.writer.write_all(datum.as_ref().as_bytes())?;
        }
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), io::Error> {
        self.writer.flush()
    }
}

pub fn write_csv(
    path: impl AsRef<Path>,
    predictions: &[(Arc<Race>, Arc<Prediction>)],
) -> Result<(), io::Error> {
    let mut writer = CsvWriter::create(path)?;
    writer.append(HEADER)?;
    for (race, prediction) in predictions {
        writer.append(prediction_record(race, prediction))?;
    }
    writer.flush()
}

/// Flattens one prediction into the report's column order. Group columns beyond the available
/// ranked groups stay blank, as does every model-derived column of a null prediction.
pub fn prediction_record(race: &Race, prediction: &Prediction) -> Vec<String> {
    let mut record = vec![
        race.date.to_string(),
        csv_field(&race.venue),
        race.race_number.to_string(),
        race.start_time
            .map(|time| time.format("%H:%M").to_string())
            .unwrap_or_default(),
    ];
    for rank in 0..REPORTED_GROUPS {
        let group = prediction
            .ranked_groups
            .as_ref()
            .and_then(|groups| groups.get(rank))
            .map(|group| {
                group
                    .iter()
                    .map(u8::to_string)
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .unwrap_or_default();
        record.push(group);
    }
    record.push(
        prediction
            .confidence()
            .map(|confidence| format!("{confidence:.6}"))
            .unwrap_or_default(),
    );
    record
}

/// Venue names are free text; a comma or quote would otherwise corrupt the row.
fn csv_field(value: &str) -> String {
    if value.contains(&[',', '"'][..]) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn summary_table(predictions: &[(Arc<Race>, Arc<Prediction>)]) -> Table {
    let mut table = Table::default()
        .with_cols(vec![
            Col::new(Styles::default().with(MinWidth(10))),
            Col::new(Styles::default().with(MinWidth(12))),
            Col::new(Styles::default().with(MinWidth(4)).with(HAlign::Right)),
            Col::new(Styles::default().with(MinWidth(20))),
            Col::new(Styles::default().with(MinWidth(10)).with(HAlign::Right)),
        ])
        .with_row(Row::new(
            Styles::default().with(Header(true)),
            vec![
                "Date".into(),
                "Venue".into(),
                "Race".into(),
                "Picks".into(),
                "Confidence".into(),
            ],
        ));
    for (race, prediction) in predictions {
        let picks = match &prediction.ranked_groups {
            None => "no model".to_string(),
            Some(groups) => groups
                .iter()
                .take(REPORTED_GROUPS)
                .map(|group| {
                    group
                        .iter()
                        .map(u8::to_string)
                        .collect::<Vec<_>>()
                        .join(",")
                })
                .collect::<Vec<_>>()
                .join(" > "),
        };
        table.push_row(Row::new(
            Styles::default(),
            vec![
                race.date.to_string().into(),
                race.venue.clone().into(),
                race.race_number.to_string().into(),
                picks.into(),
                prediction
                    .confidence()
                    .map(|confidence| format!("{confidence:.4}"))
                    .unwrap_or_default()
                    .into(),
            ],
        ));
    }
    table
}

//! CSV export feed for historical race results

use polars::prelude::*;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::source::{parse_yyyymmdd, DateRange, FeedCredentials, RaceSource};
use crate::error::{PipelineError, Result};
use crate::models::RawRunnerRecord;

/// File name of the results export inside the data directory
pub const RESULTS_FILENAME: &str = "race_results.csv";

/// Race results read from `<data_dir>/race_results.csv`
///
/// One row per runner, columns named after the `RawRunnerRecord` fields.
/// Missing required numeric cells come through as NaN or 0 so the
/// preprocessor can reject the row with its race/horse ids.
pub struct CsvFeed {
    path: PathBuf,
    credentials: FeedCredentials,
}

impl CsvFeed {
    pub fn new<P: AsRef<Path>>(data_dir: P, credentials: FeedCredentials) -> Self {
        Self {
            path: data_dir.as_ref().join(RESULTS_FILENAME),
            credentials,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> std::result::Result<Vec<RawRunnerRecord>, PolarsError> {
        // Read everything as strings so ids keep leading zeros
        let df = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(0))
            .try_into_reader_with_file_path(Some(self.path.clone()))?
            .finish()?;

        dataframe_to_records(&df)
    }
}

impl RaceSource for CsvFeed {
    fn name(&self) -> &str {
        "csv"
    }

    fn fetch(&self, range: &DateRange) -> Result<Vec<RawRunnerRecord>> {
        if !self.path.exists() {
            return Err(PipelineError::FeedUnavailable(format!(
                "{} does not exist",
                self.path.display()
            )));
        }
        debug!(
            "Reading {} (software id {:?})",
            self.path.display(),
            self.credentials.software_id
        );

        let records = self
            .read()
            .map_err(|e| PipelineError::Feed(format!("{}: {}", self.path.display(), e)))?;
        let total = records.len();

        // Unparseable dates are kept so the preprocessor reports them
        let records: Vec<RawRunnerRecord> = records
            .into_iter()
            .filter(|r| parse_yyyymmdd(&r.race_date).map_or(true, |d| range.contains(d)))
            .collect();

        debug!("{} of {} rows inside {}", records.len(), total, range);
        Ok(records)
    }
}

/// Convert a results DataFrame to raw records, preserving row order
fn dataframe_to_records(df: &DataFrame) -> PolarsResult<Vec<RawRunnerRecord>> {
    let height = df.height();

    let race_id = string_column(df, "race_id")?;
    let race_date = string_column(df, "race_date")?;
    let horse_id = string_column(df, "horse_id")?;
    let jockey_id = string_column(df, "jockey_id")?;
    let trainer_id = string_column(df, "trainer_id")?;
    let horse_weight = f64_column(df, "horse_weight")?;
    let popularity = i64_column(df, "popularity")?;
    let win_odds = f64_column(df, "win_odds")?;
    let distance = f64_column(df, "distance")?;
    let track_type = string_column(df, "track_type")?;
    let track_condition = string_column(df, "track_condition")?;
    let age = i64_column(df, "age")?;
    let sex = string_column(df, "sex")?;
    let post_position = i64_column(df, "post_position")?;
    let num_runners = i64_column(df, "num_runners")?;

    // Optional columns
    let horse_name = optional(df, "horse_name", string_column)?;
    let horse_num = optional(df, "horse_num", i64_column)?;
    let finish_position = optional(df, "finish_position", i64_column)?;
    let prev_horse_weight = optional(df, "prev_horse_weight", f64_column)?;
    let prev_race_date = optional(df, "prev_race_date", string_column)?;

    let mut records = Vec::with_capacity(height);
    for i in 0..height {
        records.push(RawRunnerRecord {
            race_id: race_id[i].clone().unwrap_or_default(),
            race_date: race_date[i].clone().unwrap_or_default(),
            horse_id: horse_id[i].clone().unwrap_or_default(),
            horse_name: horse_name[i].clone().filter(|s| !s.is_empty()),
            horse_num: horse_num[i],
            jockey_id: jockey_id[i].clone().unwrap_or_default(),
            trainer_id: trainer_id[i].clone().unwrap_or_default(),
            finish_position: finish_position[i],
            horse_weight: horse_weight[i].unwrap_or(f64::NAN),
            prev_horse_weight: prev_horse_weight[i],
            prev_race_date: prev_race_date[i].clone().filter(|s| !s.is_empty()),
            popularity: popularity[i].unwrap_or(0),
            win_odds: win_odds[i].unwrap_or(f64::NAN),
            distance: distance[i].unwrap_or(f64::NAN),
            track_type: track_type[i].clone().unwrap_or_default(),
            track_condition: track_condition[i].clone().unwrap_or_default(),
            age: age[i].unwrap_or(0),
            sex: sex[i].clone().unwrap_or_default(),
            post_position: post_position[i].unwrap_or(0),
            num_runners: num_runners[i].unwrap_or(0),
        });
    }

    Ok(records)
}

// Column readers

fn string_column(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<String>>> {
    let series = df.column(name)?.cast(&DataType::String)?;
    let values = series.str()?;
    Ok(values
        .into_iter()
        .map(|v| v.map(|s| s.trim().to_string()))
        .collect())
}

fn f64_column(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<f64>>> {
    let series = df.column(name)?.cast(&DataType::Float64)?;
    let values = series.f64()?;
    Ok(values.into_iter().collect())
}

fn i64_column(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<i64>>> {
    let series = df.column(name)?.cast(&DataType::Int64)?;
    let values = series.i64()?;
    Ok(values.into_iter().collect())
}

fn optional<T: Clone>(
    df: &DataFrame,
    name: &str,
    read: fn(&DataFrame, &str) -> PolarsResult<Vec<Option<T>>>,
) -> PolarsResult<Vec<Option<T>>> {
    if df.column(name).is_ok() {
        read(df, name)
    } else {
        Ok(vec![None; df.height()])
    }
}

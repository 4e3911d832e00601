//! Raw record validation and race grouping
//!
//! Unrecognized categorical labels abort the run. Out-of-range values exclude
//! the single record (logged with its race/horse ids) and the run continues.

use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

use super::source::parse_yyyymmdd;
use crate::error::{validate_at_least_one, validate_positive, RecordContext, Result};
use crate::models::{RaceGroup, RawRunnerRecord, RunnerRecord, Sex, TrackCondition, TrackType};

/// Counts from one preprocessing pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreprocessReport {
    pub total: usize,
    pub accepted: usize,
    pub excluded: usize,
    pub races: usize,
}

#[derive(Debug, Clone)]
pub struct PreprocessOutput {
    pub races: Vec<RaceGroup>,
    pub report: PreprocessReport,
}

/// Validate one raw record and convert it to canonical types
pub fn canonicalize(raw: &RawRunnerRecord) -> Result<RunnerRecord> {
    let ctx = RecordContext::new(&raw.race_id, &raw.horse_id);

    // Categoricals first: an unknown label is a schema problem, not a bad row
    let track_type = TrackType::parse(&raw.track_type)
        .ok_or_else(|| ctx.unrecognized("track_type", &raw.track_type))?;
    let track_condition = TrackCondition::parse(&raw.track_condition)
        .ok_or_else(|| ctx.unrecognized("track_condition", &raw.track_condition))?;
    let sex = Sex::parse(&raw.sex).ok_or_else(|| ctx.unrecognized("sex", &raw.sex))?;

    for (field, value) in [
        ("race_id", &raw.race_id),
        ("horse_id", &raw.horse_id),
        ("jockey_id", &raw.jockey_id),
        ("trainer_id", &raw.trainer_id),
    ] {
        if value.trim().is_empty() {
            return Err(ctx.invalid(field, "is empty"));
        }
    }

    let race_date = parse_yyyymmdd(&raw.race_date)
        .ok_or_else(|| ctx.invalid("race_date", format!("is not YYYYMMDD: {:?}", raw.race_date)))?;
    let prev_race_date = match &raw.prev_race_date {
        Some(value) => {
            let prev = parse_yyyymmdd(value).ok_or_else(|| {
                ctx.invalid("prev_race_date", format!("is not YYYYMMDD: {:?}", value))
            })?;
            if prev >= race_date {
                return Err(ctx.invalid(
                    "prev_race_date",
                    format!("{} does not precede race date {}", value, raw.race_date),
                ));
            }
            Some(prev)
        }
        None => None,
    };

    let horse_weight = validate_positive(ctx, "horse_weight", raw.horse_weight)?;
    let prev_horse_weight = raw
        .prev_horse_weight
        .map(|w| validate_positive(ctx, "prev_horse_weight", w))
        .transpose()?;
    let win_odds = validate_positive(ctx, "win_odds", raw.win_odds)?;
    let distance_m = validate_positive(ctx, "distance", raw.distance)?;
    let age = validate_at_least_one(ctx, "age", raw.age)?;
    let post_position = validate_at_least_one(ctx, "post_position", raw.post_position)?;
    let popularity = validate_at_least_one(ctx, "popularity", raw.popularity)?;
    let num_runners = validate_at_least_one(ctx, "num_runners", raw.num_runners)?;
    let finish_position = raw
        .finish_position
        .map(|p| validate_at_least_one(ctx, "finish_position", p))
        .transpose()?;
    let horse_num = match raw.horse_num {
        Some(n) => validate_at_least_one(ctx, "horse_num", n)?,
        None => post_position,
    };

    Ok(RunnerRecord {
        race_id: raw.race_id.trim().to_string(),
        race_date,
        horse_id: raw.horse_id.trim().to_string(),
        horse_name: raw.horse_name.clone(),
        horse_num,
        jockey_id: raw.jockey_id.trim().to_string(),
        trainer_id: raw.trainer_id.trim().to_string(),
        finish_position,
        horse_weight,
        prev_horse_weight,
        prev_race_date,
        popularity,
        win_odds,
        distance_m,
        track_type,
        track_condition,
        age,
        sex,
        post_position,
        num_runners,
    })
}

/// Canonicalize every record and group the survivors into races
///
/// Returns the first schema error encountered; validation failures are
/// counted in the report instead.
pub fn preprocess(raw: &[RawRunnerRecord]) -> Result<PreprocessOutput> {
    let mut records = Vec::with_capacity(raw.len());
    let mut excluded = 0;

    for record in raw {
        match canonicalize(record) {
            Ok(r) => records.push(r),
            Err(e) if e.is_recoverable() => {
                warn!("Excluding record: {}", e);
                excluded += 1;
            }
            Err(e) => return Err(e),
        }
    }

    let (races, dropped) = group_races(records);
    excluded += dropped;

    let report = PreprocessReport {
        total: raw.len(),
        accepted: raw.len() - excluded,
        excluded,
        races: races.len(),
    };
    debug!(
        "Preprocessed {} records: {} accepted, {} excluded, {} races",
        report.total, report.accepted, report.excluded, report.races
    );

    Ok(PreprocessOutput { races, report })
}

/// Group canonical records by race id
///
/// Groups are ordered by (race date, race id) and runners by
/// (post position, horse id). A record repeating a horse already in its race,
/// or carrying a different date than the race's first record, is excluded;
/// the number of such records is returned alongside the groups.
pub fn group_races(records: Vec<RunnerRecord>) -> (Vec<RaceGroup>, usize) {
    let mut groups: BTreeMap<String, RaceGroup> = BTreeMap::new();
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut excluded = 0;

    for record in records {
        let group = groups
            .entry(record.race_id.clone())
            .or_insert_with(|| RaceGroup {
                race_id: record.race_id.clone(),
                race_date: record.race_date,
                runners: Vec::new(),
            });

        if group.race_date != record.race_date {
            warn!(
                "Excluding record: race {} horse {}: race_date {} differs from {}",
                record.race_id, record.horse_id, record.race_date, group.race_date
            );
            excluded += 1;
            continue;
        }
        if !seen.insert((record.race_id.clone(), record.horse_id.clone())) {
            warn!(
                "Excluding record: race {} horse {}: duplicate entry",
                record.race_id, record.horse_id
            );
            excluded += 1;
            continue;
        }
        group.runners.push(record);
    }

    let mut races: Vec<RaceGroup> = groups.into_values().collect();
    for race in &mut races {
        race.runners.sort_by(|a, b| {
            a.post_position
                .cmp(&b.post_position)
                .then_with(|| a.horse_id.cmp(&b.horse_id))
        });
    }
    races.sort_by(|a, b| {
        a.race_date
            .cmp(&b.race_date)
            .then_with(|| a.race_id.cmp(&b.race_id))
    });

    (races, excluded)
}

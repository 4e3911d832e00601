//! Race data sources
//!
//! Every source returns the same `RawRunnerRecord` schema. `FallbackSource`
//! swaps in the offline sample when the primary feed cannot be read, so the
//! rest of the pipeline never needs to know where the records came from.

use chrono::NaiveDate;
use std::fmt;
use tracing::{info, warn};

use crate::error::{PipelineError, Result};
use crate::models::RawRunnerRecord;

/// Parse a YYYYMMDD date
pub fn parse_yyyymmdd(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.len() != 8 {
        return None;
    }
    NaiveDate::parse_from_str(value, "%Y%m%d").ok()
}

/// Inclusive date range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Result<Self> {
        if from > to {
            return Err(PipelineError::InvalidDateRange(format!(
                "{} is after {}",
                from.format("%Y%m%d"),
                to.format("%Y%m%d")
            )));
        }
        Ok(Self { from, to })
    }

    /// Parse a range from two YYYYMMDD strings
    pub fn parse(from: &str, to: &str) -> Result<Self> {
        let parse = |s: &str| {
            parse_yyyymmdd(s).ok_or_else(|| {
                PipelineError::InvalidDateRange(format!("expected YYYYMMDD, got {:?}", s))
            })
        };
        Self::new(parse(from)?, parse(to)?)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && date <= self.to
    }

    pub fn num_days(&self) -> i64 {
        (self.to - self.from).num_days()
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{}",
            self.from.format("%Y%m%d"),
            self.to.format("%Y%m%d")
        )
    }
}

/// Vendor feed credentials, passed through to the feed untouched
#[derive(Clone, Default, PartialEq, Eq)]
pub struct FeedCredentials {
    pub software_id: String,
    pub user_id: String,
}

impl FeedCredentials {
    pub fn is_empty(&self) -> bool {
        self.software_id.is_empty() && self.user_id.is_empty()
    }
}

impl fmt::Debug for FeedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedCredentials")
            .field("software_id", &self.software_id)
            .field("user_id", &if self.user_id.is_empty() { "" } else { "***" })
            .finish()
    }
}

/// A source of raw runner records
pub trait RaceSource {
    /// Short name for logging
    fn name(&self) -> &str;

    /// Fetch runner records for races inside `range`, in feed order
    fn fetch(&self, range: &DateRange) -> Result<Vec<RawRunnerRecord>>;
}

impl<S: RaceSource + ?Sized> RaceSource for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn fetch(&self, range: &DateRange) -> Result<Vec<RawRunnerRecord>> {
        (**self).fetch(range)
    }
}

/// Primary source with an offline fallback
pub struct FallbackSource<P, F> {
    primary: P,
    fallback: F,
}

impl<P: RaceSource, F: RaceSource> FallbackSource<P, F> {
    pub fn new(primary: P, fallback: F) -> Self {
        Self { primary, fallback }
    }
}

impl<P: RaceSource, F: RaceSource> RaceSource for FallbackSource<P, F> {
    fn name(&self) -> &str {
        self.primary.name()
    }

    fn fetch(&self, range: &DateRange) -> Result<Vec<RawRunnerRecord>> {
        match self.primary.fetch(range) {
            Ok(records) => {
                info!(
                    "Fetched {} records from {} ({})",
                    records.len(),
                    self.primary.name(),
                    range
                );
                Ok(records)
            }
            Err(e) if e.is_unavailable() => {
                warn!(
                    "{} unavailable: {}. Using {} instead.",
                    self.primary.name(),
                    e,
                    self.fallback.name()
                );
                self.fallback.fetch(range)
            }
            Err(e) => Err(e),
        }
    }
}

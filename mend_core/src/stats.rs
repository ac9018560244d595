//! Aggregate statistics over a set of records.
//!
//! Everything is recomputed from the records passed in; nothing is cached.

use crate::types::labelled_enum;
use crate::{InjuryRecord, RecordStatus, Severity};
use chrono::{Datelike, Duration, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bucket width for frequency-over-time
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Day,
    #[default]
    Week,
    Month,
}

labelled_enum!(Granularity, "granularity" {
    Day => "day",
    Week => "week",
    Month => "month",
});

impl Granularity {
    /// First day of the bucket containing `date`. Weeks start on Monday.
    pub fn bucket_start(self, date: NaiveDate) -> NaiveDate {
        match self {
            Granularity::Day => date,
            Granularity::Week => {
                date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
            }
            Granularity::Month => date.with_day(1).unwrap_or(date),
        }
    }

    fn next_bucket(self, start: NaiveDate) -> Option<NaiveDate> {
        match self {
            Granularity::Day => start.succ_opt(),
            Granularity::Week => start.checked_add_signed(Duration::weeks(1)),
            Granularity::Month => start.checked_add_months(Months::new(1)),
        }
    }
}

/// Number of records created in one time bucket
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct FrequencyBucket {
    pub start: NaiveDate,
    pub count: usize,
}

/// Dashboard snapshot
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct Statistics {
    pub total_records: usize,
    pub active_injuries: usize,
    pub healed_injuries: usize,
    pub by_injury_type: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_body_part: BTreeMap<String, usize>,
    pub by_status: BTreeMap<RecordStatus, usize>,
    pub most_common_body_part: Option<String>,
    /// Creation to HEALED, over healed records only
    pub average_recovery_seconds: Option<i64>,
    pub median_recovery_seconds: Option<i64>,
    pub frequency: Vec<FrequencyBucket>,
}

impl Statistics {
    pub fn average_recovery(&self) -> Option<Duration> {
        self.average_recovery_seconds.map(Duration::seconds)
    }

    pub fn median_recovery(&self) -> Option<Duration> {
        self.median_recovery_seconds.map(Duration::seconds)
    }
}

/// Compute the full snapshot
pub fn compute<'a>(
    records: impl IntoIterator<Item = &'a InjuryRecord>,
    granularity: Granularity,
) -> Statistics {
    let records: Vec<&InjuryRecord> = records.into_iter().collect();
    let mut stats = Statistics {
        total_records: records.len(),
        ..Statistics::default()
    };

    for record in &records {
        *stats
            .by_injury_type
            .entry(record.injury_type.clone())
            .or_default() += 1;
        *stats.by_severity.entry(record.severity).or_default() += 1;
        *stats.by_status.entry(record.status).or_default() += 1;
        if let Some(part) = &record.body_part {
            *stats.by_body_part.entry(part.clone()).or_default() += 1;
        }
    }

    stats.active_injuries = stats
        .by_status
        .get(&RecordStatus::Active)
        .copied()
        .unwrap_or(0);
    stats.healed_injuries = stats
        .by_status
        .get(&RecordStatus::Healed)
        .copied()
        .unwrap_or(0);

    // Highest count wins; BTreeMap order makes ties alphabetical
    stats.most_common_body_part = stats
        .by_body_part
        .iter()
        .fold(None::<(&String, usize)>, |best, (part, &count)| match best {
            Some((_, best_count)) if best_count >= count => best,
            _ => Some((part, count)),
        })
        .map(|(part, _)| part.clone());

    let mut durations: Vec<i64> = records
        .iter()
        .filter_map(|r| r.recovery_duration())
        .map(|d| d.num_seconds())
        .collect();
    durations.sort_unstable();
    stats.average_recovery_seconds = average(&durations);
    stats.median_recovery_seconds = median(&durations);

    stats.frequency = frequency(records.iter().copied(), granularity);
    stats
}

fn average(sorted: &[i64]) -> Option<i64> {
    if sorted.is_empty() {
        return None;
    }
    let total: i128 = sorted.iter().map(|&s| i128::from(s)).sum();
    i64::try_from(total / sorted.len() as i128).ok()
}

fn median(sorted: &[i64]) -> Option<i64> {
    let n = sorted.len();
    match n {
        0 => None,
        _ if n % 2 == 1 => Some(sorted[n / 2]),
        _ => {
            let (a, b) = (i128::from(sorted[n / 2 - 1]), i128::from(sorted[n / 2]));
            i64::try_from((a + b) / 2).ok()
        }
    }
}

/// Records created per bucket, oldest first, with empty buckets filled in
/// between the first and last non-empty ones.
pub fn frequency<'a>(
    records: impl IntoIterator<Item = &'a InjuryRecord>,
    granularity: Granularity,
) -> Vec<FrequencyBucket> {
    let mut counts: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for record in records {
        let start = granularity.bucket_start(record.created_at.date_naive());
        *counts.entry(start).or_default() += 1;
    }

    let (Some(&first), Some(&last)) = (counts.keys().next(), counts.keys().next_back()) else {
        return Vec::new();
    };

    let mut buckets = Vec::new();
    let mut cursor = Some(first);
    while let Some(start) = cursor.filter(|s| *s <= last) {
        buckets.push(FrequencyBucket {
            start,
            count: counts.get(&start).copied().unwrap_or(0),
        });
        cursor = granularity.next_bucket(start);
    }
    buckets
}

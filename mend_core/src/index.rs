//! Timeline index over record summaries.
//!
//! Keeps one ordered set of record keys per filterable dimension (creation
//! date, severity, status, body part, tag). Within every set records are
//! ordered newest first, ties broken by id ascending, so a query is a set
//! intersection followed by a slice.

use crate::types::labelled_enum;
use crate::{InjuryRecord, RecordStatus, RecordSummary, Severity};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use uuid::Uuid;

/// Position of a record on the timeline
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct TimelineKey {
    created_at: DateTime<Utc>,
    id: Uuid,
}

impl Ord for TimelineKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .created_at
            .cmp(&self.created_at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for TimelineKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<&RecordSummary> for TimelineKey {
    fn from(summary: &RecordSummary) -> Self {
        Self {
            created_at: summary.created_at,
            id: summary.id,
        }
    }
}

/// Criteria for selecting records. Unset fields match everything.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filter {
    pub severity: Option<Severity>,
    pub status: Option<RecordStatus>,
    /// Case-insensitive exact match
    pub body_part: Option<String>,
    /// Records must carry every listed tag
    pub tags: Vec<String>,
    /// Inclusive, on the UTC creation date
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    /// Case-insensitive substring over type, description and body part
    pub search: Option<String>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn status(mut self, status: RecordStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn body_part(mut self, body_part: impl Into<String>) -> Self {
        self.body_part = Some(body_part.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn between(mut self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        self.date_from = from;
        self.date_to = to;
        self
    }

    pub fn search(mut self, query: impl Into<String>) -> Self {
        self.search = Some(query.into());
        self
    }

    fn matches_text(&self, summary: &RecordSummary) -> bool {
        let Some(query) = self.search.as_deref() else {
            return true;
        };
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return true;
        }
        summary.injury_type.to_lowercase().contains(&query)
            || summary.description.to_lowercase().contains(&query)
            || summary
                .body_part
                .as_deref()
                .is_some_and(|part| part.to_lowercase().contains(&query))
    }
}

/// Result ordering for queries
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
    /// Most severe first
    Severity,
    /// ACTIVE, HEALING, HEALED, ARCHIVED
    Status,
}

labelled_enum!(SortOrder, "sort order" {
    Newest => "newest",
    Oldest => "oldest",
    Severity => "severity",
    Status => "status",
});

/// Offset/limit pagination
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: Option<usize>,
}

impl Page {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit: Some(limit),
        }
    }

    /// Zero-based page number of `size` records
    pub fn number(number: usize, size: usize) -> Self {
        Self::new(number.saturating_mul(size), size)
    }
}

/// Sorted, queryable views over the current set of records
#[derive(Debug, Default)]
pub struct TimelineIndex {
    entries: HashMap<Uuid, RecordSummary>,
    timeline: BTreeSet<TimelineKey>,
    by_date: BTreeMap<NaiveDate, BTreeSet<TimelineKey>>,
    by_severity: BTreeMap<Severity, BTreeSet<TimelineKey>>,
    by_status: BTreeMap<RecordStatus, BTreeSet<TimelineKey>>,
    by_body_part: BTreeMap<String, BTreeSet<TimelineKey>>,
    by_tag: BTreeMap<String, BTreeSet<TimelineKey>>,
}

fn insert_key<K: Ord>(map: &mut BTreeMap<K, BTreeSet<TimelineKey>>, value: K, key: TimelineKey) {
    map.entry(value).or_default().insert(key);
}

fn remove_key<K: Ord>(map: &mut BTreeMap<K, BTreeSet<TimelineKey>>, value: &K, key: &TimelineKey) {
    if let Some(set) = map.get_mut(value) {
        set.remove(key);
        if set.is_empty() {
            map.remove(value);
        }
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

impl TimelineIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from a full scan of records
    pub fn build<'a>(records: impl IntoIterator<Item = &'a InjuryRecord>) -> Self {
        let mut index = Self::new();
        for record in records {
            index.upsert(record.summary());
        }
        index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<&RecordSummary> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.entries.contains_key(&id)
    }

    /// Insert or refresh the entry for a record
    pub fn upsert(&mut self, summary: RecordSummary) {
        self.remove(summary.id);

        let key = TimelineKey::from(&summary);
        self.timeline.insert(key);
        insert_key(&mut self.by_date, summary.created_at.date_naive(), key);
        insert_key(&mut self.by_severity, summary.severity, key);
        insert_key(&mut self.by_status, summary.status, key);
        if let Some(part) = &summary.body_part {
            insert_key(&mut self.by_body_part, normalize(part), key);
        }
        for tag in &summary.tags {
            insert_key(&mut self.by_tag, normalize(tag), key);
        }
        self.entries.insert(summary.id, summary);
    }

    pub fn remove(&mut self, id: Uuid) -> Option<RecordSummary> {
        let summary = self.entries.remove(&id)?;
        let key = TimelineKey::from(&summary);

        self.timeline.remove(&key);
        remove_key(&mut self.by_date, &summary.created_at.date_naive(), &key);
        remove_key(&mut self.by_severity, &summary.severity, &key);
        remove_key(&mut self.by_status, &summary.status, &key);
        if let Some(part) = &summary.body_part {
            remove_key(&mut self.by_body_part, &normalize(part), &key);
        }
        for tag in &summary.tags {
            remove_key(&mut self.by_tag, &normalize(tag), &key);
        }
        Some(summary)
    }

    /// Ids of matching records, newest first
    pub fn ids(&self, filter: &Filter) -> Vec<Uuid> {
        self.matching(filter).into_iter().map(|s| s.id).collect()
    }

    /// Filter, sort and paginate. Never fails; no match is an empty page.
    pub fn query(&self, filter: &Filter, sort: SortOrder, page: Page) -> Vec<RecordSummary> {
        let mut matched = self.matching(filter);

        match sort {
            SortOrder::Newest => {}
            SortOrder::Oldest => matched.sort_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.id.cmp(&b.id))
            }),
            // Stable sorts keep the newest-first order within each group
            SortOrder::Severity => matched.sort_by(|a, b| b.severity.cmp(&a.severity)),
            SortOrder::Status => matched.sort_by_key(|s| s.status),
        }

        let limit = page.limit.unwrap_or(usize::MAX);
        matched
            .into_iter()
            .skip(page.offset)
            .take(limit)
            .cloned()
            .collect()
    }

    fn matching(&self, filter: &Filter) -> Vec<&RecordSummary> {
        let empty = BTreeSet::new();
        let dated;
        let mut sets: Vec<&BTreeSet<TimelineKey>> = Vec::new();

        if let Some(severity) = filter.severity {
            sets.push(self.by_severity.get(&severity).unwrap_or(&empty));
        }
        if let Some(status) = filter.status {
            sets.push(self.by_status.get(&status).unwrap_or(&empty));
        }
        if let Some(part) = &filter.body_part {
            sets.push(self.by_body_part.get(&normalize(part)).unwrap_or(&empty));
        }
        for tag in &filter.tags {
            sets.push(self.by_tag.get(&normalize(tag)).unwrap_or(&empty));
        }

        if filter.date_from.is_some() || filter.date_to.is_some() {
            dated = self.date_range(filter.date_from, filter.date_to);
            sets.push(&dated);
        }

        // Walk the smallest set, look up the rest
        sets.sort_by_key(|set| set.len());
        let (driver, others) = match sets.split_first() {
            Some((first, rest)) => (*first, rest),
            None => (&self.timeline, &[][..]),
        };

        driver
            .iter()
            .filter(|key| others.iter().all(|set| set.contains(*key)))
            .filter_map(|key| self.entries.get(&key.id))
            .filter(|summary| filter.matches_text(summary))
            .collect()
    }

    fn date_range(&self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> BTreeSet<TimelineKey> {
        let from = from.unwrap_or(NaiveDate::MIN);
        let to = to.unwrap_or(NaiveDate::MAX);
        if from > to {
            return BTreeSet::new();
        }
        self.by_date
            .range(from..=to)
            .flat_map(|(_, keys)| keys.iter().copied())
            .collect()
    }
}
